//! Configuration for the sync engine.

use std::time::Duration;

/// Deadline for one batch of attachment uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(4);

/// Number of uploads allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadline for all attachment uploads of one save.
    pub upload_timeout: Duration,
    /// Maximum number of uploads in flight per batch.
    pub max_concurrent_uploads: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }

    /// Sets the upload batch deadline.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Sets the upload concurrency limit. Values below one are raised to one.
    pub fn with_max_concurrent_uploads(mut self, limit: usize) -> Self {
        self.max_concurrent_uploads = limit.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
