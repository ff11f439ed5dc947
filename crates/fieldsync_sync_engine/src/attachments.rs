//! Attachment store abstraction and an in-memory implementation.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Progress callback: `(bytes_sent, bytes_total)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Metadata of a stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMetadata {
    /// Attachment name.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Time the upload completed.
    pub uploaded_at: DateTime<Utc>,
}

/// A store for named binary payloads.
///
/// Uploads are cancelled by dropping the returned future, which happens
/// when the task running it is aborted.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Uploads `payload` under `name`, replacing any previous payload.
    async fn upload(
        &self,
        name: &str,
        payload: Bytes,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<AttachmentMetadata>;

    /// Removes the payload stored under `name`.
    async fn remove(&self, name: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    delay: Option<Duration>,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct Ledger {
    started: Vec<String>,
    completed: Vec<String>,
    cancelled: Vec<String>,
    removed: Vec<String>,
}

/// An in-memory attachment store for testing.
///
/// Uploads can be delayed or failed per name. Every upload is recorded as
/// started, then as completed or cancelled; a failed upload is neither.
#[derive(Default)]
pub struct MemoryAttachmentStore {
    objects: RwLock<HashMap<String, Bytes>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    default_delay: Mutex<Duration>,
    ledger: Mutex<Ledger>,
}

impl MemoryAttachmentStore {
    /// Creates an empty store with no upload delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every upload without a per-name delay.
    pub fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.lock() = delay;
    }

    /// Delays uploads of `name`.
    pub fn set_delay(&self, name: &str, delay: Duration) {
        self.behaviors.lock().entry(name.to_string()).or_default().delay = Some(delay);
    }

    /// Makes uploads of `name` fail with `message` once their delay elapses.
    pub fn fail(&self, name: &str, message: &str) {
        self.behaviors.lock().entry(name.to_string()).or_default().failure =
            Some(message.to_string());
    }

    /// Returns the stored payload of `name`.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.read().get(name).cloned()
    }

    /// Returns true if a payload is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.objects.read().contains_key(name)
    }

    /// Names of uploads started, in order.
    pub fn started(&self) -> Vec<String> {
        self.ledger.lock().started.clone()
    }

    /// Names of uploads completed, in order.
    pub fn completed(&self) -> Vec<String> {
        self.ledger.lock().completed.clone()
    }

    /// Names of uploads cancelled before completing, in order.
    pub fn cancelled(&self) -> Vec<String> {
        self.ledger.lock().cancelled.clone()
    }

    /// Names removed, in order.
    pub fn removed(&self) -> Vec<String> {
        self.ledger.lock().removed.clone()
    }

    fn behavior(&self, name: &str) -> Behavior {
        let mut behavior = self.behaviors.lock().get(name).cloned().unwrap_or_default();
        behavior.delay = behavior.delay.or(Some(*self.default_delay.lock()));
        behavior
    }
}

impl fmt::Debug for MemoryAttachmentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAttachmentStore")
            .field("objects", &self.objects.read().len())
            .field("ledger", &*self.ledger.lock())
            .finish()
    }
}

/// Records the upload as cancelled unless disarmed before drop.
struct CancelGuard<'a> {
    ledger: &'a Mutex<Ledger>,
    name: &'a str,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(name = self.name, "upload cancelled");
            self.ledger.lock().cancelled.push(self.name.to_string());
        }
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn upload(
        &self,
        name: &str,
        payload: Bytes,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<AttachmentMetadata> {
        self.ledger.lock().started.push(name.to_string());
        let mut guard = CancelGuard {
            ledger: &self.ledger,
            name,
            armed: true,
        };

        let behavior = self.behavior(name);
        if let Some(delay) = behavior.delay.filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }
        guard.armed = false;

        if let Some(message) = behavior.failure {
            return Err(SyncError::upload(name, message));
        }

        let size = payload.len() as u64;
        if let Some(progress) = progress {
            progress(size, size);
        }
        self.objects.write().insert(name.to_string(), payload);
        self.ledger.lock().completed.push(name.to_string());

        Ok(AttachmentMetadata {
            name: name.to_string(),
            size,
            uploaded_at: Utc::now(),
        })
    }

    async fn remove(&self, name: &str) -> SyncResult<()> {
        self.objects.write().remove(name);
        self.ledger.lock().removed.push(name.to_string());
        Ok(())
    }
}
