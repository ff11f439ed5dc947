//! Turns field changes of bound entities into remote patches.
//!
//! The propagator is installed as the [`FieldObserver`] of every entity the
//! engine binds. Notifications arrive synchronously from the setter; the
//! resulting patches are queued and written by a single dispatcher task, so
//! patches reach the store in submission order.
//!
//! Attachment uploads run concurrently, but each field keeps a generation
//! counter: only the upload of the latest replacement writes its name, and
//! superseded uploads are removed from the attachment store once they land.

use crate::attachments::AttachmentStore;
use crate::error::{SyncError, SyncResult};
use crate::remote::{Patch, RemoteStore};
use crate::upload::upload_payload;
use fieldsync_codec::{encode_with, RelationDiff, TaggedValue, Value};
use fieldsync_core::{DataRef, Entity, FieldChange, FieldObserver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Callback invoked once with the entity reference and the outcome of the
/// first patch that settles after it was registered.
pub type Completion = Box<dyn FnOnce(DataRef, SyncResult<()>) + Send>;

type Completions = Arc<Mutex<HashMap<String, Completion>>>;

type SlotKey = (String, String);
type Slots = Arc<Mutex<HashMap<SlotKey, AttachmentSlot>>>;

/// Replacement state of one attachment field.
#[derive(Debug, Default)]
struct AttachmentSlot {
    /// Bumped on every replacement or clear; older uploads are stale.
    generation: u64,
    /// Uploads still running for this field.
    in_flight: usize,
    /// Name last queued for the remote document.
    remote_name: Option<String>,
}

impl AttachmentSlot {
    /// Starts a new generation. `local` is the name the entity held before
    /// the change; it is authoritative when nothing is in flight.
    fn advance(&mut self, local: Option<&str>) -> u64 {
        if self.in_flight == 0 {
            self.remote_name = local.map(str::to_string);
        }
        self.generation += 1;
        self.generation
    }
}

enum Command {
    Patch {
        entity_id: String,
        reference: DataRef,
        patch: Patch,
        written: Option<oneshot::Sender<bool>>,
    },
    Flush(oneshot::Sender<()>),
}

/// What an attachment upload leads to once it lands.
enum Replacement {
    /// Latest generation: the name write is queued.
    Queued {
        name: String,
        replaced: Option<String>,
        result: oneshot::Receiver<bool>,
    },
    /// A newer replacement exists; carries the orphaned upload, if any.
    Superseded(Option<String>),
    Failed(SyncError),
}

/// Field observer that writes each change to the remote store.
pub struct ChangePropagator {
    attachments: Arc<dyn AttachmentStore>,
    queue: mpsc::UnboundedSender<Command>,
    completions: Completions,
    slots: Slots,
    runtime: Handle,
}

impl ChangePropagator {
    /// Creates a propagator and spawns its dispatcher on `runtime`.
    ///
    /// The dispatcher stops once the propagator is dropped and the queue
    /// has drained.
    pub fn start(
        remote: Arc<dyn RemoteStore>,
        attachments: Arc<dyn AttachmentStore>,
        runtime: Handle,
    ) -> Arc<Self> {
        let (queue, commands) = mpsc::unbounded_channel();
        let completions = Completions::default();
        runtime.spawn(dispatch(remote, commands, completions.clone()));
        Arc::new(Self {
            attachments,
            queue,
            completions,
            slots: Slots::default(),
            runtime,
        })
    }

    /// Registers a fire-once completion for the next patch of `entity_id`.
    ///
    /// Replaces any completion still pending for that entity.
    pub fn register_completion(&self, entity_id: &str, completion: Completion) {
        let previous = self
            .completions
            .lock()
            .insert(entity_id.to_string(), completion);
        if previous.is_some() {
            debug!(entity = entity_id, "pending completion replaced");
        }
    }

    /// Drops the pending completion of `entity_id` without invoking it.
    pub fn discard_completion(&self, entity_id: &str) {
        self.completions.lock().remove(entity_id);
    }

    /// Takes the pending completion of `entity_id` and invokes it.
    pub fn settle(&self, entity_id: &str, reference: DataRef, result: SyncResult<()>) {
        settle(&self.completions, entity_id, reference, result);
    }

    /// Waits until every patch submitted before this call has settled.
    pub async fn flush(&self) {
        let (done, settled) = oneshot::channel();
        if self.queue.send(Command::Flush(done)).is_ok() {
            let _ = settled.await;
        }
    }

    fn submit(&self, entity: &Entity, patch: Patch) {
        enqueue(&self.queue, entity.id(), entity.reference(), patch, None);
    }

    fn relation_changed(&self, entity: &Entity, change: &FieldChange) -> usize {
        let empty = Default::default();
        let old = change.old.as_relation().unwrap_or(&empty);
        let new = change.new.as_relation().unwrap_or(&empty);
        let diff = RelationDiff::between(old, new);

        for member in &diff.added {
            let path = format!("{}/{member}", change.field);
            self.submit(entity, Patch::new().with(path, true).touched());
        }
        for member in &diff.removed {
            let path = format!("{}/{member}", change.field);
            self.submit(entity, Patch::new().delete(path).touched());
        }
        diff.added.len() + diff.removed.len()
    }

    fn attachment_changed(&self, entity: &Entity, change: &FieldChange) -> usize {
        let previous = change.old.as_attachment().map(|a| a.name().to_string());
        if let (Some(old), Some(new)) = (change.old.as_attachment(), change.new.as_attachment()) {
            if old.same_name(new) {
                trace!(entity = %entity.reference(), field = %change.field, "attachment unchanged");
                return 0;
            }
        }
        let Some(attachment) = entity.bind_attachment(&change.field) else {
            return 0;
        };

        let key = (entity.id(), change.field.clone());
        let generation = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_default();
            slot.in_flight += 1;
            slot.advance(previous.as_deref())
        };

        let attachments = self.attachments.clone();
        let queue = self.queue.clone();
        let completions = self.completions.clone();
        let slots = self.slots.clone();
        let reference = entity.reference();
        self.runtime.spawn(async move {
            let uploaded = upload_payload(&*attachments, &attachment).await;
            let (entity_id, field) = &key;

            let step = {
                let mut slots = slots.lock();
                match (uploaded, slots.get_mut(&key).filter(|s| s.generation == generation)) {
                    (Ok(name), Some(slot)) => {
                        let replaced = slot.remote_name.replace(name.clone());
                        let (written, result) = oneshot::channel();
                        let patch = Patch::new().with(field.as_str(), name.as_str()).touched();
                        enqueue(&queue, entity_id.clone(), reference.clone(), patch, Some(written));
                        Replacement::Queued {
                            name,
                            replaced,
                            result,
                        }
                    }
                    (Ok(name), None) => Replacement::Superseded(Some(name)),
                    (Err(e), Some(_)) => Replacement::Failed(e),
                    (Err(e), None) => {
                        debug!(entity = %reference, field = %field, error = %e, "superseded upload failed");
                        Replacement::Superseded(None)
                    }
                }
            };

            match step {
                Replacement::Queued {
                    name,
                    replaced,
                    result,
                } => {
                    let written = result.await.unwrap_or(false);
                    if written {
                        debug!(entity = %reference, field = %field, name = %name, "attachment replaced");
                        if let Some(old) = replaced.filter(|old| *old != name) {
                            remove_attachment(&*attachments, &old).await;
                        }
                    } else {
                        let mut slots = slots.lock();
                        if let Some(slot) = slots.get_mut(&key) {
                            if slot.remote_name.as_deref() == Some(name.as_str()) {
                                slot.remote_name = replaced;
                            }
                        }
                    }
                }
                Replacement::Superseded(Some(stale)) => {
                    debug!(entity = %reference, field = %field, name = %stale, "discarding superseded upload");
                    remove_attachment(&*attachments, &stale).await;
                }
                Replacement::Superseded(None) => {}
                Replacement::Failed(e) => {
                    warn!(entity = %reference, field = %field, error = %e, "attachment replacement failed");
                    settle(&completions, entity_id, reference.clone(), Err(e));
                }
            }

            let mut slots = slots.lock();
            if let Some(slot) = slots.get_mut(&key) {
                slot.in_flight = slot.in_flight.saturating_sub(1);
            }
        });
        1
    }

    fn attachment_cleared(&self, entity: &Entity, change: &FieldChange) -> usize {
        let previous = change.old.as_attachment().map(|a| a.name().to_string());
        let key = (entity.id(), change.field.clone());
        let (written, result) = oneshot::channel();

        let replaced = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key).or_default();
            slot.advance(previous.as_deref());
            let replaced = slot.remote_name.take();
            let patch = Patch::new().delete(change.field.clone()).touched();
            enqueue(&self.queue, entity.id(), entity.reference(), patch, Some(written));
            replaced
        };

        if let Some(old) = replaced {
            let attachments = self.attachments.clone();
            self.runtime.spawn(async move {
                if result.await.unwrap_or(false) {
                    remove_attachment(&*attachments, &old).await;
                }
            });
        }
        1
    }

    fn value_changed(&self, entity: &Entity, change: &FieldChange) -> usize {
        if matches!(&change.new, TaggedValue::StringArray(items) if items.is_empty()) {
            return 0;
        }
        let codec = entity
            .schema()
            .field(&change.field)
            .and_then(|(_, descriptor)| descriptor.codec());
        let value = encode_with(codec, &change.field, &change.new).unwrap_or(Value::Null);
        self.submit(entity, Patch::new().with(change.field.clone(), value).touched());
        1
    }
}

impl FieldObserver for ChangePropagator {
    fn field_changed(&self, entity: &Entity, change: FieldChange) {
        let submitted = match (&change.old, &change.new) {
            (_, TaggedValue::Attachment(_)) => self.attachment_changed(entity, &change),
            (TaggedValue::Attachment(_), TaggedValue::Null) => {
                self.attachment_cleared(entity, &change)
            }
            (TaggedValue::Relation(_), _) | (_, TaggedValue::Relation(_)) => {
                self.relation_changed(entity, &change)
            }
            _ => self.value_changed(entity, &change),
        };
        trace!(entity = %entity.reference(), field = %change.field, submitted, "field changed");

        if submitted == 0 {
            self.settle(&entity.id(), entity.reference(), Ok(()));
        }
    }

    fn detached(&self, entity_id: &str) {
        if self.completions.lock().remove(entity_id).is_some() {
            debug!(entity = entity_id, "pending completion dropped on teardown");
        }
        self.slots.lock().retain(|(id, _), _| id != entity_id);
    }
}

impl fmt::Debug for ChangePropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePropagator")
            .field("pending_completions", &self.completions.lock().len())
            .finish()
    }
}

async fn dispatch(
    remote: Arc<dyn RemoteStore>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    completions: Completions,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Patch {
                entity_id,
                reference,
                patch,
                written,
            } => {
                let result = remote.update_children(&reference, patch).await;
                match &result {
                    Ok(()) => trace!(entity = %reference, "patch written"),
                    Err(e) => warn!(entity = %reference, error = %e, "patch failed"),
                }
                if let Some(written) = written {
                    let _ = written.send(result.is_ok());
                }
                settle(&completions, &entity_id, reference, result);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn enqueue(
    queue: &mpsc::UnboundedSender<Command>,
    entity_id: String,
    reference: DataRef,
    patch: Patch,
    written: Option<oneshot::Sender<bool>>,
) {
    let command = Command::Patch {
        entity_id,
        reference,
        patch,
        written,
    };
    if let Err(mpsc::error::SendError(Command::Patch { reference, .. })) = queue.send(command) {
        warn!(entity = %reference, "patch dropped: dispatcher stopped");
    }
}

async fn remove_attachment(attachments: &dyn AttachmentStore, name: &str) {
    if let Err(e) = attachments.remove(name).await {
        warn!(name, error = %e, "failed to remove replaced attachment");
    }
}

fn settle(
    completions: &Mutex<HashMap<String, Completion>>,
    entity_id: &str,
    reference: DataRef,
    result: SyncResult<()>,
) {
    let completion = completions.lock().remove(entity_id);
    if let Some(completion) = completion {
        completion(reference, result);
    }
}
