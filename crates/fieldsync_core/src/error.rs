//! Error types for fieldsync core.

use fieldsync_codec::FieldType;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entity and schema operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The entity schema has no field with this name.
    #[error("unknown field `{field}`")]
    UnknownField {
        /// The requested field name.
        field: String,
    },

    /// A value of the wrong type was assigned to a field.
    #[error("field `{field}` is declared as {expected}, got {found}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared field type.
        expected: FieldType,
        /// Type of the assigned value.
        found: FieldType,
    },

    /// A field name was declared twice.
    #[error("field `{field}` declared more than once")]
    DuplicateField {
        /// The duplicated name.
        field: String,
    },

    /// A field name collides with a reserved document key.
    #[error("field name `{field}` is reserved")]
    ReservedField {
        /// The reserved name.
        field: String,
    },

    /// The schema definition is malformed.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Create an unknown field error.
    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }
}
