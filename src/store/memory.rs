//! In-process store with optimistic transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{CommitOutcome, Snapshot, Store, StoreError, WatchedValue};

#[derive(Debug)]
struct Entry {
    /// `None` once the key has been removed
    value: Option<String>,
    revision: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Monotonic counter stamped on every write
    revision: u64,
}

impl Inner {
    fn revision_of(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(0, |e| e.revision)
    }

    fn write(&mut self, key: &str, value: Option<String>) {
        self.revision += 1;
        let revision = self.revision;
        self.entries
            .insert(key.to_string(), Entry { value, revision });
    }
}

/// A thread-safe in-memory [`Store`].
///
/// Every write stamps the key with a fresh revision, and a commit succeeds
/// only if all watched keys still carry the revision seen at watch time.
/// Clones share the same data, which lets several limiters in one test act
/// as independent processes against one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a key, as an expiry or eviction would.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            inner.write(key, None);
        }
    }

    /// Number of keys currently holding a value.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.entries.get(key).and_then(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.inner.lock().write(key, Some(value));
        Ok(())
    }

    async fn watch(&self, keys: &[String]) -> Result<Snapshot, StoreError> {
        let inner = self.inner.lock();
        let entries = keys
            .iter()
            .map(|key| {
                let entry = inner.entries.get(key);
                WatchedValue {
                    key: key.clone(),
                    value: entry.and_then(|e| e.value.clone()),
                    revision: entry.map_or(0, |e| e.revision),
                }
            })
            .collect();
        Ok(Snapshot::new(entries))
    }

    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, String)>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.inner.lock();

        let changed = snapshot
            .entries()
            .iter()
            .find(|watched| inner.revision_of(&watched.key) != watched.revision);
        if let Some(watched) = changed {
            trace!(key = %watched.key, "Watched key changed, rejecting commit");
            return Ok(CommitOutcome::Conflict);
        }

        for (key, value) in writes {
            inner.write(&key, Some(value));
        }
        Ok(CommitOutcome::Committed)
    }
}
