//! In-memory remote store for testing.

use crate::error::{SyncError, SyncResult};
use crate::remote::{Patch, RemoteStore, TransactionOutcome, TransactionResult, UpdateFn};
use async_trait::async_trait;
use chrono::Utc;
use fieldsync_codec::Value;
use fieldsync_core::{DataRef, Snapshot};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates chronologically sortable, collision resistant keys.
///
/// Keys are 20 characters: 8 encode the millisecond timestamp, 12 are random.
/// Keys generated within the same millisecond increment the random part so
/// ordering is preserved.
#[derive(Debug, Default)]
struct PushIdGenerator {
    last_millis: i64,
    last_random: [u8; 12],
}

impl PushIdGenerator {
    fn next(&mut self, now_millis: i64) -> String {
        if now_millis == self.last_millis {
            for digit in self.last_random.iter_mut().rev() {
                if *digit < 63 {
                    *digit += 1;
                    break;
                }
                *digit = 0;
            }
        } else {
            let mut rng = rand::thread_rng();
            for digit in &mut self.last_random {
                *digit = rng.gen_range(0..64);
            }
            self.last_millis = now_millis;
        }

        let mut time_part = [0u8; 8];
        let mut millis = now_millis.max(0);
        for slot in time_part.iter_mut().rev() {
            *slot = PUSH_CHARS[(millis % 64) as usize];
            millis /= 64;
        }

        time_part
            .iter()
            .copied()
            .chain(self.last_random.iter().map(|&d| PUSH_CHARS[d as usize]))
            .map(char::from)
            .collect()
    }
}

/// A write observed by the [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    /// A committed transaction.
    Transaction {
        /// Target location.
        reference: DataRef,
        /// Value written, before timestamp resolution.
        value: Value,
    },
    /// A multi-path update.
    Update {
        /// Target location.
        reference: DataRef,
        /// Patch applied, before timestamp resolution.
        patch: Patch,
    },
    /// A removal.
    Remove {
        /// Removed location.
        reference: DataRef,
    },
}

impl WriteRecord {
    /// Returns the target location of the write.
    pub fn reference(&self) -> &DataRef {
        match self {
            WriteRecord::Transaction { reference, .. }
            | WriteRecord::Update { reference, .. }
            | WriteRecord::Remove { reference } => reference,
        }
    }
}

/// An in-memory remote store.
///
/// Holds the whole tree in one value. Every operation is atomic with respect
/// to the others. Server timestamps resolve to the wall clock in epoch
/// milliseconds. While disconnected every operation fails with
/// [`SyncError::NotConnected`].
///
/// # Example
///
/// ```rust
/// use fieldsync_core::DataRef;
/// use fieldsync_sync_engine::{MemoryStore, Patch, RemoteStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let doc = DataRef::new("v1/user/alice");
/// store.update_children(&doc, Patch::new().with("name", "Alice")).await.unwrap();
///
/// let snapshot = store.observe_once(&doc.child("name")).await.unwrap();
/// assert_eq!(snapshot.value().and_then(|v| v.as_text()), Some("Alice"));
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    root: RwLock<Value>,
    connected: AtomicBool,
    push_ids: Mutex<PushIdGenerator>,
    writes: Mutex<Vec<WriteRecord>>,
}

impl MemoryStore {
    /// Creates an empty, connected store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Null),
            connected: AtomicBool::new(true),
            push_ids: Mutex::new(PushIdGenerator::default()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns true if the store accepts operations.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns a copy of the value at `reference`.
    pub fn value_at(&self, reference: &DataRef) -> Option<Value> {
        let root = self.root.read();
        lookup(&root, reference).cloned()
    }

    /// Writes `value` at `reference` directly, bypassing the write log.
    ///
    /// Useful for seeding documents written by another client.
    pub fn seed(&self, reference: &DataRef, value: impl Into<Value>) {
        let value = resolve(value.into(), Utc::now().timestamp_millis());
        let segments: Vec<&str> = reference.segments().collect();
        write_at(&mut self.root.write(), &segments, value);
    }

    /// Returns all writes performed so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Returns the patches applied so far, in order.
    pub fn updates(&self) -> Vec<(DataRef, Patch)> {
        self.writes
            .lock()
            .iter()
            .filter_map(|w| match w {
                WriteRecord::Update { reference, patch } => Some((reference.clone(), patch.clone())),
                _ => None,
            })
            .collect()
    }

    /// Clears the write log.
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn record(&self, write: WriteRecord) {
        trace!(reference = %write.reference(), "memory store write");
        self.writes.lock().push(write);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn child_by_auto_id(&self, parent: &DataRef) -> DataRef {
        let key = self.push_ids.lock().next(Utc::now().timestamp_millis());
        parent.child(key)
    }

    async fn run_transaction(
        &self,
        reference: &DataRef,
        update: &mut UpdateFn<'_>,
    ) -> SyncResult<TransactionResult> {
        self.ensure_connected()?;

        let committed = {
            let mut root = self.root.write();
            let current = lookup(&root, reference).cloned();
            match update(current.as_ref()) {
                TransactionOutcome::Commit(value) => {
                    let segments: Vec<&str> = reference.segments().collect();
                    let resolved = resolve(value.clone(), Utc::now().timestamp_millis());
                    write_at(&mut root, &segments, resolved);
                    Some(value)
                }
                TransactionOutcome::Abort => None,
            }
        };

        let committed = match committed {
            Some(value) => {
                self.record(WriteRecord::Transaction {
                    reference: reference.clone(),
                    value,
                });
                true
            }
            None => false,
        };

        Ok(TransactionResult {
            committed,
            snapshot: Snapshot::new(reference.clone(), self.value_at(reference)),
        })
    }

    async fn observe_once(&self, reference: &DataRef) -> SyncResult<Snapshot> {
        self.ensure_connected()?;
        Ok(Snapshot::new(reference.clone(), self.value_at(reference)))
    }

    async fn update_children(&self, reference: &DataRef, patch: Patch) -> SyncResult<()> {
        self.ensure_connected()?;
        {
            let now = Utc::now().timestamp_millis();
            let mut root = self.root.write();
            for (path, value) in patch.iter() {
                let target = reference.child(path);
                let segments: Vec<&str> = target.segments().collect();
                write_at(&mut root, &segments, resolve(value.clone(), now));
            }
        }
        self.record(WriteRecord::Update {
            reference: reference.clone(),
            patch,
        });
        Ok(())
    }

    async fn remove_value(&self, reference: &DataRef) -> SyncResult<()> {
        self.ensure_connected()?;
        {
            let segments: Vec<&str> = reference.segments().collect();
            write_at(&mut self.root.write(), &segments, Value::Null);
        }
        self.record(WriteRecord::Remove {
            reference: reference.clone(),
        });
        Ok(())
    }
}

fn lookup<'a>(root: &'a Value, reference: &DataRef) -> Option<&'a Value> {
    reference
        .segments()
        .try_fold(root, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

/// Writes `value` at the path below `node`, creating intermediate maps.
/// Null deletes the path and prunes parents left empty.
fn write_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !matches!(node, Value::Map(_)) {
        if value.is_null() {
            return;
        }
        *node = Value::Map(BTreeMap::new());
    }
    let Value::Map(children) = node else {
        return;
    };

    let child = children.entry((*first).to_string()).or_default();
    write_at(child, rest, value);
    if is_empty(child) {
        children.remove(*first);
    }
}

/// Replaces server timestamps with `now` and drops nulls and empty maps.
fn resolve(value: Value, now: i64) -> Value {
    match value {
        Value::ServerTimestamp => Value::Integer(now),
        Value::Map(children) => Value::Map(
            children
                .into_iter()
                .map(|(k, v)| (k, resolve(v, now)))
                .filter(|(_, v)| !is_empty(v))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| resolve(v, now)).collect()),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Map(children) => children.is_empty(),
        _ => false,
    }
}
