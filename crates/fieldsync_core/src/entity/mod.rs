//! Entities: typed field values with identity and sync state.

mod identity;
mod observer;

pub use identity::Identity;
pub use observer::{FieldChange, FieldObserver};

use crate::error::{CoreError, CoreResult};
use crate::reference::DataRef;
use crate::schema::EntitySchema;
use chrono::{DateTime, Utc};
use fieldsync_codec::{encode_with, from_epoch_millis, Attachment, FieldType, TaggedValue, Value};
use observer::ObserverRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Whether a remote snapshot has ever been applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// No snapshot applied; the entity only exists locally.
    Unbound,
    /// A snapshot was applied and field observers are installed.
    Bound,
}

#[derive(Debug)]
struct EntityState {
    values: Vec<TaggedValue>,
    local_timestamp: DateTime<Utc>,
    server_created_at: Option<f64>,
    server_updated_at: Option<f64>,
    bind_state: BindState,
}

/// A locally held record kept in sync with one document of the remote tree.
///
/// Field values are stored in schema order. Mutations go through
/// [`Entity::set`], which notifies the installed [`FieldObserver`] once the
/// entity is bound. Equality and hashing use the resolved identifier.
pub struct Entity {
    schema: Arc<EntitySchema>,
    identity: RwLock<Identity>,
    state: RwLock<EntityState>,
    observers: Mutex<ObserverRegistry>,
}

impl Entity {
    /// Creates an empty entity with a temporary identifier.
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self::with_identity(schema, Identity::new())
    }

    /// Creates an empty entity addressed by a caller-assigned identifier.
    pub fn with_id(schema: Arc<EntitySchema>, id: impl Into<String>) -> Self {
        Self::with_identity(schema, Identity::with_caller(id))
    }

    fn with_identity(schema: Arc<EntitySchema>, identity: Identity) -> Self {
        let values = vec![TaggedValue::Null; schema.fields().len()];
        Self {
            schema,
            identity: RwLock::new(identity),
            state: RwLock::new(EntityState {
                values,
                local_timestamp: Utc::now(),
                server_created_at: None,
                server_updated_at: None,
                bind_state: BindState::Unbound,
            }),
            observers: Mutex::new(ObserverRegistry::default()),
        }
    }

    /// Returns the entity's schema.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Returns the authoritative identifier.
    pub fn id(&self) -> String {
        self.identity.read().resolve().to_string()
    }

    /// Returns a copy of all identifier candidates.
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Returns the location of this entity's document.
    pub fn reference(&self) -> DataRef {
        self.schema.collection().child(self.id())
    }

    /// Returns the bind state.
    pub fn bind_state(&self) -> BindState {
        self.state.read().bind_state
    }

    /// Returns true once a snapshot has been applied.
    pub fn is_bound(&self) -> bool {
        self.bind_state() == BindState::Bound
    }

    /// Creation time: server timestamp if known, else local construction time.
    pub fn created_at(&self) -> DateTime<Utc> {
        let state = self.state.read();
        state
            .server_created_at
            .and_then(from_epoch_millis)
            .unwrap_or(state.local_timestamp)
    }

    /// Last update time: server timestamp if known, else local construction
    /// time.
    pub fn updated_at(&self) -> DateTime<Utc> {
        let state = self.state.read();
        state
            .server_updated_at
            .and_then(from_epoch_millis)
            .unwrap_or(state.local_timestamp)
    }

    /// Returns the value of `field`, or `None` if the schema has no such
    /// field.
    pub fn get(&self, field: &str) -> Option<TaggedValue> {
        let (index, _) = self.schema.field(field)?;
        Some(self.state.read().values[index].clone())
    }

    /// Returns a string field.
    pub fn get_string(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Returns an integer field.
    pub fn get_integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.as_integer())
    }

    /// Returns a relation field; unset reads as empty.
    pub fn get_relation(&self, field: &str) -> BTreeSet<String> {
        match self.get(field) {
            Some(TaggedValue::Relation(set)) => set,
            _ => BTreeSet::new(),
        }
    }

    /// Returns a string array field; unset reads as empty.
    pub fn get_string_array(&self, field: &str) -> Vec<String> {
        match self.get(field) {
            Some(TaggedValue::StringArray(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Returns an attachment field.
    pub fn get_attachment(&self, field: &str) -> Option<Attachment> {
        match self.get(field) {
            Some(TaggedValue::Attachment(attachment)) => Some(attachment),
            _ => None,
        }
    }

    /// Returns all field values in schema order.
    pub fn values(&self) -> Vec<(String, TaggedValue)> {
        let state = self.state.read();
        self.schema
            .fields()
            .iter()
            .zip(state.values.iter())
            .map(|(d, v)| (d.name().to_string(), v.clone()))
            .collect()
    }

    /// Assigns a field and notifies its observer, if one is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist or `value` does not fit
    /// its declared type.
    pub fn set(&self, field: &str, value: impl Into<TaggedValue>) -> CoreResult<()> {
        let value = value.into();
        let (index, descriptor) = self
            .schema
            .field(field)
            .ok_or_else(|| CoreError::unknown_field(field))?;

        if let Some(found) = value.field_type().filter(|t| *t != descriptor.field_type()) {
            return Err(CoreError::TypeMismatch {
                field: field.to_string(),
                expected: descriptor.field_type(),
                found,
            });
        }

        let old = std::mem::replace(&mut self.state.write().values[index], value.clone());

        let observer = self.observers.lock().observer_for(field);
        if let Some(observer) = observer {
            observer.field_changed(
                self,
                FieldChange {
                    field: field.to_string(),
                    old,
                    new: value,
                },
            );
        }
        Ok(())
    }

    /// Encodes every synchronized field into a document map.
    ///
    /// Fields that encode to nothing are omitted.
    pub fn encode_fields(&self) -> BTreeMap<String, Value> {
        let state = self.state.read();
        self.schema
            .synced_fields()
            .filter_map(|(index, d)| {
                encode_with(d.codec(), d.name(), &state.values[index]).map(|v| (d.name().to_string(), v))
            })
            .collect()
    }

    /// Binds the attachment in `field` to this entity and returns a copy.
    ///
    /// Returns `None` if the field holds no attachment.
    pub fn bind_attachment(&self, field: &str) -> Option<Attachment> {
        let (index, _) = self.schema.field(field)?;
        let id = self.id();
        let mut state = self.state.write();
        match &mut state.values[index] {
            TaggedValue::Attachment(attachment) => {
                attachment.bind(id, field);
                Some(attachment.clone())
            }
            _ => None,
        }
    }

    /// Binds and returns every attachment held by a synchronized field, in
    /// schema order.
    pub fn bind_attachments(&self) -> Vec<(String, Attachment)> {
        self.schema
            .synced_fields()
            .filter(|(_, d)| d.field_type() == FieldType::Attachment)
            .filter_map(|(_, d)| {
                self.bind_attachment(d.name())
                    .map(|a| (d.name().to_string(), a))
            })
            .collect()
    }

    /// Number of fields with an installed observer.
    pub fn observed_field_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Removes all field observers.
    ///
    /// Returns true if observers were installed. Safe to call repeatedly;
    /// only the first call after binding has an effect.
    pub fn teardown(&self) -> bool {
        let observer = self.observers.lock().clear();
        match observer {
            Some(observer) => {
                let id = self.id();
                debug!(entity = %id, "removing field observers");
                observer.detached(&id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_remote_key(&self, key: &str) {
        self.identity.write().set_remote(key);
    }

    pub(crate) fn set_server_timestamps(&self, created: Option<f64>, updated: Option<f64>) {
        let mut state = self.state.write();
        state.server_created_at = created;
        state.server_updated_at = updated;
    }

    /// Assigns a value without notifying observers.
    pub(crate) fn assign(&self, index: usize, value: TaggedValue) {
        self.state.write().values[index] = value;
    }

    /// Installs `observer` on every synchronized field and marks the entity
    /// bound. Returns false if the entity was already bound.
    pub(crate) fn bind(&self, observer: Arc<dyn FieldObserver>) -> bool {
        {
            let mut state = self.state.write();
            if state.bind_state == BindState::Bound {
                return false;
            }
            state.bind_state = BindState::Bound;
        }
        let fields = self.schema.synced_fields().map(|(_, d)| d.name());
        self.observers.lock().install(observer, fields)
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("model", &self.schema.model())
            .field("id", &self.id())
            .field("bind_state", &self.bind_state())
            .field("values", &self.values())
            .finish()
    }
}
