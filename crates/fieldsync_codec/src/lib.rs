//! # fieldsync Codec
//!
//! Conversion between typed entity fields and the generic values held by the
//! remote key-value tree.
//!
//! This crate provides:
//! - [`Value`]: the stored representation (JSON-like, plus a server
//!   timestamp placeholder)
//! - [`TaggedValue`]: the native value of an entity field
//! - [`FieldType`]: the declared type a field is decoded as
//! - [`encode`] / [`decode`]: the built-in conversion rules
//! - [`FieldCodec`]: per-field overrides
//!
//! ## Conversion Rules
//!
//! - Dates are stored as epoch seconds (double)
//! - URLs are stored as strings
//! - Relation sets are stored as `id -> true` maps
//! - Empty string arrays and relation sets are omitted
//! - Attachments are never written inline; only their name is stored once
//!   uploaded
//!
//! ## Usage
//!
//! ```
//! use fieldsync_codec::{decode, encode, FieldType, TaggedValue, Value};
//!
//! let tags = TaggedValue::StringArray(vec!["rust".to_string()]);
//! let stored = encode("tags", &tags).unwrap();
//! assert_eq!(stored, Value::Array(vec![Value::from("rust")]));
//!
//! let decoded = decode("tags", FieldType::StringArray, Some(&stored));
//! assert_eq!(decoded, tags);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod codec;
mod error;
mod tagged;
mod value;

pub use attachment::{Attachment, AttachmentBinding};
pub use codec::{
    decode, decode_with, encode, encode_with, from_epoch_millis, from_epoch_seconds,
    to_epoch_seconds, try_decode, FieldCodec,
};
pub use error::{CodecError, CodecResult};
pub use tagged::{FieldType, RelationDiff, TaggedValue};
pub use value::{Value, SERVER_VALUE_KEY};
