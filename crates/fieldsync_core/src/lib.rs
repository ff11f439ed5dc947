//! # fieldsync Core
//!
//! The entity model shared by every fieldsync component.
//!
//! This crate provides:
//! - [`EntitySchema`]: the per-type field descriptor table
//! - [`Entity`]: field values, identity and bind state of one record
//! - [`DataRef`] / [`Snapshot`]: addressing and point-in-time reads of the
//!   remote tree
//! - [`FieldObserver`]: the hook through which field changes leave an entity
//! - [`apply_snapshot`]: decoding a remote document onto an entity
//!
//! ## Lifecycle
//!
//! An entity starts `Unbound`. The first applied snapshot fixes its
//! identifier to the snapshot key and installs the observer on every
//! synchronized field. From then on each [`Entity::set`] reaches the
//! observer exactly once, regardless of how many snapshots are applied
//! later. Teardown (explicit or on drop) removes the observer.
//!
//! ## Key Invariants
//!
//! - `id` resolves remote key > caller key > temporary key
//! - Observers are installed at most once and removed at most once
//! - Excluded fields are never encoded, decoded or observed
//! - Snapshot application never notifies observers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod entity;
mod error;
mod reference;
mod schema;

pub use applier::{apply_snapshot, ApplyReport};
pub use entity::{BindState, Entity, FieldChange, FieldObserver, Identity};
pub use error::{CoreError, CoreResult};
pub use reference::{DataRef, Snapshot};
pub use schema::{
    EntitySchema, EntitySchemaBuilder, FieldDescriptor, CREATED_AT_KEY, DEFAULT_VERSION,
    UPDATED_AT_KEY,
};
