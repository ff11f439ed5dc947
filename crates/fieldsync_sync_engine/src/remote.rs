//! Remote store abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use fieldsync_codec::Value;
use fieldsync_core::{DataRef, Snapshot, UPDATED_AT_KEY};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// An atomic multi-path update, keyed by path relative to its target.
///
/// A `Null` value deletes the path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    entries: BTreeMap<String, Value>,
}

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write of `value` at `path`.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(path.into(), value.into());
        self
    }

    /// Adds a deletion of `path`.
    #[must_use]
    pub fn delete(self, path: impl Into<String>) -> Self {
        self.with(path, Value::Null)
    }

    /// Stamps the document's update time with the server timestamp.
    #[must_use]
    pub fn touched(self) -> Self {
        self.with(UPDATED_AT_KEY, Value::ServerTimestamp)
    }

    /// Returns the value written at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Iterates the entries in path order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Number of paths written.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Patch {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Decision returned by a transaction update function.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// Replace the current value.
    Commit(Value),
    /// Leave the current value untouched.
    Abort,
}

/// Result of a settled transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    /// True if the update was written.
    pub committed: bool,
    /// The value at the location after settlement.
    pub snapshot: Snapshot,
}

/// Update function run by [`RemoteStore::run_transaction`].
///
/// Receives the current value (`None` if absent). May be called more than
/// once if the store retries on contention.
pub type UpdateFn<'a> = dyn FnMut(Option<&Value>) -> TransactionOutcome + Send + 'a;

/// A hierarchical key-value store holding entity documents.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (a hosted realtime database, the in-memory store for
/// testing, etc.).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Allocates a fresh, globally unique child location of `parent`.
    fn child_by_auto_id(&self, parent: &DataRef) -> DataRef;

    /// Runs an optimistic read-modify-write on `reference`.
    async fn run_transaction(
        &self,
        reference: &DataRef,
        update: &mut UpdateFn<'_>,
    ) -> SyncResult<TransactionResult>;

    /// Reads `reference` once.
    async fn observe_once(&self, reference: &DataRef) -> SyncResult<Snapshot>;

    /// Applies `patch` below `reference` atomically.
    async fn update_children(&self, reference: &DataRef, patch: Patch) -> SyncResult<()>;

    /// Deletes the value at `reference`.
    async fn remove_value(&self, reference: &DataRef) -> SyncResult<()>;
}
