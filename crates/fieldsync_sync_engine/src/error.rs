//! Error types for the sync engine.

use fieldsync_core::DataRef;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A save was attempted on an entity already bound to a remote key.
    #[error("entity {id} is already bound to a remote key")]
    InvalidId {
        /// Identifier of the entity.
        id: String,
    },

    /// An attachment has no usable payload.
    #[error("attachment {name} has no usable payload")]
    InvalidFile {
        /// Attachment name.
        name: String,
    },

    /// The upload batch exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store is unreachable.
    #[error("not connected to remote store")]
    NotConnected,

    /// The attachment store rejected an upload.
    #[error("upload of {name} failed: {message}")]
    Upload {
        /// Attachment name.
        name: String,
        /// Error message.
        message: String,
    },

    /// A stored value could not be converted.
    #[error("codec error: {0}")]
    Codec(#[from] fieldsync_codec::CodecError),

    /// An entity or schema operation failed.
    #[error("entity error: {0}")]
    Core(#[from] fieldsync_core::CoreError),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// No tokio runtime was available.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an upload error.
    pub fn upload(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upload {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected | SyncError::Upload { .. } => true,
            _ => false,
        }
    }
}

/// A failed save.
///
/// `reference` is the location the save was writing to, if one had been
/// chosen before the failure. Fields committed there are not rolled back.
#[derive(Error, Debug)]
#[error("save failed: {source}")]
pub struct SaveError {
    /// Target of the save, if the failure happened after it was resolved.
    pub reference: Option<DataRef>,
    /// The underlying failure.
    pub source: SyncError,
}

impl SaveError {
    pub(crate) fn at(reference: &DataRef, source: SyncError) -> Self {
        Self {
            reference: Some(reference.clone()),
            source,
        }
    }

    pub(crate) fn unaddressed(source: SyncError) -> Self {
        Self {
            reference: None,
            source,
        }
    }
}
