//! Applies remote snapshots onto entity fields.
//!
//! The first application binds the entity: its identifier becomes the
//! snapshot key and the observer is installed on every synchronized field.
//! Later applications only refresh values. Assignments made here never
//! reach the observer.

use crate::entity::{Entity, FieldObserver};
use crate::schema::{CREATED_AT_KEY, UPDATED_AT_KEY};
use crate::reference::Snapshot;
use fieldsync_codec::{decode_with, CodecError, TaggedValue, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of applying one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Number of fields assigned from the snapshot.
    pub decoded: usize,
    /// Fields that could not be decoded and kept their previous value.
    pub skipped: Vec<(String, CodecError)>,
    /// True if this application transitioned the entity to bound.
    pub newly_bound: bool,
}

/// Applies `snapshot` to `entity`, installing `observer` on first use.
///
/// Decode failures are per field: the field keeps its current value and the
/// failure is listed in the report.
pub fn apply_snapshot(
    entity: &Entity,
    snapshot: &Snapshot,
    observer: Arc<dyn FieldObserver>,
) -> ApplyReport {
    let mut report = ApplyReport::default();
    entity.set_remote_key(snapshot.key());

    if let Some(document) = snapshot.value().filter(|v| v.as_map().is_some()) {
        let timestamp = |key: &str| document.get(key).and_then(Value::as_f64);
        entity.set_server_timestamps(timestamp(CREATED_AT_KEY), timestamp(UPDATED_AT_KEY));

        let id = entity.id();
        for (index, descriptor) in entity.schema().synced_fields() {
            let name = descriptor.name();
            match decode_with(descriptor.codec(), name, descriptor.field_type(), document.get(name)) {
                Ok(mut value) => {
                    if let TaggedValue::Attachment(attachment) = &mut value {
                        attachment.bind(id.clone(), name);
                    }
                    trace!(entity = %id, field = name, "decoded field");
                    entity.assign(index, value);
                    report.decoded += 1;
                }
                Err(e) => {
                    debug!(entity = %id, field = name, error = %e, "field left unchanged");
                    report.skipped.push((name.to_string(), e));
                }
            }
        }
    } else {
        debug!(reference = %snapshot.reference(), "snapshot holds no document");
    }

    report.newly_bound = entity.bind(observer);
    report
}
