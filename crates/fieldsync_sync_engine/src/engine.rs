//! The sync engine facade.

use crate::attachments::AttachmentStore;
use crate::config::SyncConfig;
use crate::error::{SaveError, SyncError, SyncResult};
use crate::propagator::ChangePropagator;
use crate::remote::{RemoteStore, TransactionOutcome};
use crate::upload::{UploadOrchestrator, UploadReport};
use fieldsync_codec::{TaggedValue, Value};
use fieldsync_core::{
    apply_snapshot, ApplyReport, DataRef, Entity, EntitySchema, FieldObserver, Snapshot,
    CREATED_AT_KEY, UPDATED_AT_KEY,
};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Keeps entities in sync with a remote store.
///
/// The engine saves new entities, binds them to their remote documents and
/// from then on writes every field change back as a minimal patch.
///
/// # Example
///
/// ```rust
/// use fieldsync_codec::FieldType;
/// use fieldsync_core::{Entity, EntitySchema};
/// use fieldsync_sync_engine::{MemoryAttachmentStore, MemoryStore, SyncConfig, SyncEngine};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let schema = EntitySchema::builder("user")
///     .field("name", FieldType::String)
///     .build()
///     .unwrap();
/// let engine = SyncEngine::new(
///     SyncConfig::default(),
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryAttachmentStore::new()),
/// )
/// .unwrap();
///
/// let user = Arc::new(Entity::new(schema));
/// user.set("name", "Alice").unwrap();
/// let reference = engine.save(&user).await.unwrap();
/// assert_eq!(reference.key(), user.id());
///
/// user.set("name", "Alicia").unwrap();
/// engine.flush().await;
/// # });
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    propagator: Arc<ChangePropagator>,
    uploads: UploadOrchestrator,
    runtime: Handle,
}

impl SyncEngine {
    /// Creates an engine on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a runtime.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        Ok(Self::with_runtime(config, remote, attachments, runtime))
    }

    /// Creates an engine whose background tasks run on `runtime`.
    pub fn with_runtime(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        attachments: Arc<dyn AttachmentStore>,
        runtime: Handle,
    ) -> Self {
        let propagator = ChangePropagator::start(remote.clone(), attachments.clone(), runtime.clone());
        let uploads = UploadOrchestrator::new(remote.clone(), attachments, config.clone());
        Self {
            config,
            remote,
            propagator,
            uploads,
            runtime,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Saves a new entity and binds it to the written document.
    ///
    /// The document is written under the caller key if the entity has one,
    /// else under a freshly allocated key. Attachments are uploaded after
    /// the document is written; the call returns once they are done.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::InvalidId`] and no remote effect if the
    /// entity is already bound or its caller key is not a single path
    /// segment. Any later failure carries the target
    /// reference; what was committed there is not rolled back.
    pub async fn save(&self, entity: &Arc<Entity>) -> Result<DataRef, SaveError> {
        if entity.is_bound() {
            return Err(SaveError::unaddressed(SyncError::InvalidId { id: entity.id() }));
        }

        let mut document = entity.encode_fields();
        document.insert(CREATED_AT_KEY.to_string(), Value::ServerTimestamp);
        document.insert(UPDATED_AT_KEY.to_string(), Value::ServerTimestamp);
        let document = Value::Map(document);

        let collection = entity.schema().collection();
        let target = match entity.identity().caller() {
            Some(key) => {
                check_key(key).map_err(SaveError::unaddressed)?;
                collection.child(key)
            }
            None => self.remote.child_by_auto_id(&collection),
        };
        info!(entity = %target, "saving entity");

        let mut overwrite = |_current: Option<&Value>| TransactionOutcome::Commit(document.clone());
        let result = self
            .remote
            .run_transaction(&target, &mut overwrite)
            .await
            .map_err(|e| SaveError::at(&target, e))?;
        if !result.committed {
            return Err(SaveError::at(
                &target,
                SyncError::transport_retryable("transaction was not committed"),
            ));
        }

        let snapshot = self
            .remote
            .observe_once(&target)
            .await
            .map_err(|e| SaveError::at(&target, e))?;
        self.apply_remote(entity, &snapshot);

        let report = self
            .upload_attachments(entity.clone())
            .await
            .map_err(|e| SaveError::at(&target, e))?;
        debug!(entity = %target, uploaded = report.uploaded.len(), "save complete");
        Ok(target)
    }

    /// Reads the entity stored under `id` and binds it.
    ///
    /// Returns `None` if no document exists there. Fails with
    /// [`SyncError::InvalidId`] if `id` is not a single path segment.
    pub async fn load(
        &self,
        schema: &Arc<EntitySchema>,
        id: &str,
    ) -> SyncResult<Option<Arc<Entity>>> {
        check_key(id)?;
        let reference = schema.collection().child(id);
        let snapshot = self.remote.observe_once(&reference).await?;
        if !snapshot.exists() {
            debug!(entity = %reference, "no document to load");
            return Ok(None);
        }
        let entity = Arc::new(Entity::with_id(schema.clone(), id));
        self.apply_remote(&entity, &snapshot);
        Ok(Some(entity))
    }

    /// Deletes the entity's remote document.
    ///
    /// The entity stays bound; later field changes write to the same
    /// location again.
    pub async fn remove(&self, entity: &Entity) -> SyncResult<()> {
        let reference = entity.reference();
        self.remote.remove_value(&reference).await?;
        info!(entity = %reference, "entity removed");
        Ok(())
    }

    /// Applies a snapshot received from the store, binding the entity to
    /// this engine on first use.
    pub fn apply_remote(&self, entity: &Entity, snapshot: &Snapshot) -> ApplyReport {
        let observer: Arc<dyn FieldObserver> = self.propagator.clone();
        let report = apply_snapshot(entity, snapshot, observer);
        if report.newly_bound {
            debug!(entity = %snapshot.reference(), decoded = report.decoded, "entity bound");
        }
        report
    }

    /// Sets a field and registers `completion` for the resulting write.
    ///
    /// `completion` runs once, after the first patch of this entity settles.
    /// If the change produces no patch, or the entity is not bound, it runs
    /// immediately with `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error, without running `completion`, if the field does
    /// not exist or the value does not fit its type.
    pub fn set_with_completion<F>(
        &self,
        entity: &Entity,
        field: &str,
        value: impl Into<TaggedValue>,
        completion: F,
    ) -> SyncResult<()>
    where
        F: FnOnce(DataRef, SyncResult<()>) + Send + 'static,
    {
        if !entity.is_bound() {
            entity.set(field, value)?;
            completion(entity.reference(), Ok(()));
            return Ok(());
        }

        let id = entity.id();
        self.propagator.register_completion(&id, Box::new(completion));
        if let Err(e) = entity.set(field, value) {
            self.propagator.discard_completion(&id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Waits until every patch queued before this call has been written.
    ///
    /// Attachment replacements run on their own tasks and are not covered.
    pub async fn flush(&self) {
        self.propagator.flush().await;
    }

    async fn upload_attachments(&self, entity: Arc<Entity>) -> SyncResult<UploadReport> {
        let uploads = self.uploads.clone();
        self.runtime
            .spawn(async move { uploads.upload_attachments(&entity).await })
            .await
            .map_err(|_| SyncError::Cancelled)?
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("propagator", &self.propagator)
            .finish()
    }
}

/// Document keys must name exactly one child of the collection.
fn check_key(key: &str) -> SyncResult<()> {
    if key.is_empty() || key.contains('/') {
        return Err(SyncError::InvalidId { id: key.to_string() });
    }
    Ok(())
}
