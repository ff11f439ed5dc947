//! Attachment upload orchestration.
//!
//! All attachments of an entity are uploaded as one batch: concurrently,
//! bounded by a semaphore, under a single deadline. The first failure
//! aborts the remaining uploads. Uploads that already succeeded are kept.

use crate::attachments::AttachmentStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{Patch, RemoteStore};
use fieldsync_codec::Attachment;
use fieldsync_core::{DataRef, Entity};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One attachment that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAttachment {
    /// Field holding the attachment.
    pub field: String,
    /// Attachment name.
    pub name: String,
}

/// Outcome of a successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Uploaded attachments, in completion order.
    pub uploaded: Vec<UploadedAttachment>,
}

/// Uploads an entity's attachments as one batch.
#[derive(Clone)]
pub struct UploadOrchestrator {
    remote: Arc<dyn RemoteStore>,
    attachments: Arc<dyn AttachmentStore>,
    config: SyncConfig,
}

impl UploadOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        attachments: Arc<dyn AttachmentStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            attachments,
            config,
        }
    }

    /// Uploads every attachment held by a synchronized field of `entity`.
    ///
    /// Each attachment is bound to its field before upload and, once stored,
    /// its name is written to the field in the remote document.
    ///
    /// # Errors
    ///
    /// Returns the first upload failure, or [`SyncError::Timeout`] if the
    /// batch did not finish within the configured deadline. In both cases
    /// every unfinished upload is aborted before returning.
    pub async fn upload_attachments(&self, entity: &Entity) -> SyncResult<UploadReport> {
        let pending = entity.bind_attachments();
        if pending.is_empty() {
            return Ok(UploadReport::default());
        }

        let reference = entity.reference();
        debug!(entity = %reference, count = pending.len(), "uploading attachments");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_uploads));
        let mut tasks = JoinSet::new();
        for (field, attachment) in pending {
            let attachments = self.attachments.clone();
            let remote = self.remote.clone();
            let reference = reference.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SyncError::Cancelled)?;
                let name =
                    upload_field(&*attachments, &*remote, &reference, &field, &attachment).await?;
                Ok::<_, SyncError>(UploadedAttachment { field, name })
            });
        }

        let mut report = UploadReport::default();
        let mut first_error: Option<SyncError> = None;

        let drained = tokio::time::timeout(self.config.upload_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                let failure = match joined {
                    Ok(Ok(uploaded)) => {
                        report.uploaded.push(uploaded);
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => SyncError::upload("", format!("upload task failed: {e}")),
                };
                if first_error.is_none() {
                    warn!(entity = %reference, error = %failure, "attachment upload failed, aborting batch");
                    first_error = Some(failure);
                    tasks.abort_all();
                }
            }
        })
        .await;

        if drained.is_err() {
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            warn!(entity = %reference, timeout = ?self.config.upload_timeout, "attachment upload timed out");
            return Err(SyncError::Timeout);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Uploads one attachment and writes its name to `field`.
///
/// Returns the attachment name.
pub(crate) async fn upload_field(
    attachments: &dyn AttachmentStore,
    remote: &dyn RemoteStore,
    reference: &DataRef,
    field: &str,
    attachment: &Attachment,
) -> SyncResult<String> {
    let name = upload_payload(attachments, attachment).await?;
    remote
        .update_children(reference, Patch::new().with(field, name.as_str()).touched())
        .await?;
    debug!(entity = %reference, field, name = %name, "attachment stored");
    Ok(name)
}

/// Stores the payload of `attachment` without touching the remote document.
///
/// Fails with [`SyncError::InvalidFile`] when the name or payload is empty.
pub(crate) async fn upload_payload(
    attachments: &dyn AttachmentStore,
    attachment: &Attachment,
) -> SyncResult<String> {
    let name = attachment.name();
    let payload = attachment
        .payload()
        .filter(|p| !name.is_empty() && !p.is_empty())
        .cloned()
        .ok_or_else(|| SyncError::InvalidFile {
            name: name.to_string(),
        })?;

    attachments.upload(name, payload, None).await?;
    Ok(name.to_string())
}
