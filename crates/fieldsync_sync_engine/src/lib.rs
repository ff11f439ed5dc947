//! # fieldsync Sync Engine
//!
//! Live synchronization of entities with a remote key-value tree.
//!
//! This crate provides:
//! - [`SyncEngine`]: save, load, remove and live field propagation
//! - [`RemoteStore`] / [`AttachmentStore`]: the collaborator interfaces
//! - [`MemoryStore`] / [`MemoryAttachmentStore`]: in-memory implementations
//! - [`ChangePropagator`]: field changes to remote patches
//! - [`UploadOrchestrator`]: batched, cancellable attachment uploads
//!
//! ## Architecture
//!
//! A save writes the whole document in one transaction, reads it back and
//! applies the snapshot, which binds the entity and installs the
//! propagator on its fields. Attachments are uploaded last, as one batch
//! under a deadline.
//!
//! After that, every setter call turns into a patch:
//! 1. Scalars, arrays and objects write the whole field
//! 2. Relation sets write one patch per added or removed member
//! 3. Attachments are uploaded, written by name, and replace the old one
//!
//! Each patch also stamps `_updatedAt` with the server time.
//!
//! ## Key Invariants
//!
//! - A bound entity is never saved again
//! - Patches are written in submission order
//! - A registered completion runs at most once
//! - A failed upload batch aborts its remaining uploads and rolls nothing
//!   back

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachments;
mod config;
mod engine;
mod error;
mod memory;
mod propagator;
mod remote;
mod upload;

pub use attachments::{AttachmentMetadata, AttachmentStore, MemoryAttachmentStore, ProgressCallback};
pub use config::{SyncConfig, DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_UPLOAD_TIMEOUT};
pub use engine::SyncEngine;
pub use error::{SaveError, SyncError, SyncResult};
pub use memory::{MemoryStore, WriteRecord};
pub use propagator::{ChangePropagator, Completion};
pub use remote::{Patch, RemoteStore, TransactionOutcome, TransactionResult, UpdateFn};
pub use upload::{UploadOrchestrator, UploadReport, UploadedAttachment};
