//! Error types for the codec crate.

use crate::tagged::FieldType;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting between stored and field values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The stored value has a different shape than the declared field type.
    #[error("field `{field}` expected {expected}, found {found}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared field type.
        expected: FieldType,
        /// Kind of the stored value that was found.
        found: &'static str,
    },

    /// No stored value exists for a field that has no empty form.
    #[error("field `{field}` is missing")]
    Missing {
        /// Field name.
        field: String,
    },

    /// Stored string is not a valid URL.
    #[error("field `{field}` holds an invalid URL: {message}")]
    InvalidUrl {
        /// Field name.
        field: String,
        /// Parser message.
        message: String,
    },

    /// Stored epoch seconds are outside the representable date range.
    #[error("field `{field}` holds an out-of-range date: {seconds}")]
    InvalidDate {
        /// Field name.
        field: String,
        /// The stored epoch seconds.
        seconds: f64,
    },
}

impl CodecError {
    /// Create a type mismatch error.
    pub fn type_mismatch(field: impl Into<String>, expected: FieldType, found: &'static str) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }

    /// Create a missing value error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
        }
    }
}
