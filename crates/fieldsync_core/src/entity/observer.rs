//! Field change observation.

use crate::entity::Entity;
use fieldsync_codec::TaggedValue;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A user-initiated change of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Value before the change.
    pub old: TaggedValue,
    /// Value after the change.
    pub new: TaggedValue,
}

/// Receives field changes of observed entities.
///
/// Called synchronously on the thread performing the mutation, after the
/// new value is stored and with no entity lock held.
pub trait FieldObserver: Send + Sync {
    /// Called after an observed field was changed through a setter.
    fn field_changed(&self, entity: &Entity, change: FieldChange);

    /// Called once when the entity stops being observed.
    fn detached(&self, entity_id: &str) {
        let _ = entity_id;
    }
}

/// Observer installation state of one entity.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observer: Option<Arc<dyn FieldObserver>>,
    fields: BTreeSet<String>,
}

impl ObserverRegistry {
    /// Installs `observer` on `fields`. Does nothing if already installed.
    pub(crate) fn install<'a>(
        &mut self,
        observer: Arc<dyn FieldObserver>,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        if self.observer.is_some() {
            return false;
        }
        self.observer = Some(observer);
        self.fields = fields.into_iter().map(str::to_string).collect();
        true
    }

    /// Returns the observer for `field`, if the field is observed.
    pub(crate) fn observer_for(&self, field: &str) -> Option<Arc<dyn FieldObserver>> {
        if self.fields.contains(field) {
            self.observer.clone()
        } else {
            None
        }
    }

    /// Number of observed fields.
    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }

    /// Removes every registration, returning the observer that was installed.
    pub(crate) fn clear(&mut self) -> Option<Arc<dyn FieldObserver>> {
        self.fields.clear();
        self.observer.take()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("installed", &self.observer.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}
