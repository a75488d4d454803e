//! Shared state stores for the distributed limiter.
//!
//! The distributed limiter never holds a lock across processes. It relies on
//! a store offering optimistic transactions: watch a set of keys, read them,
//! and later commit writes only if none of the watched keys changed in
//! between. This is the contract of Redis `WATCH` / `MULTI` / `EXEC`.
//! [`MemoryStore`] implements it in-process; with the `redis` feature,
//! `RedisStore` implements it against a Redis server shared by processes.

mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use keys::{BucketKeys, KeySpace};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a store. Conflicts are not errors; see [`CommitOutcome`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the call failed in transit.
    #[error("store unreachable: {0}")]
    Unavailable(String),
    /// A stored value could not be interpreted.
    #[error("unexpected value {value:?} under key {key}")]
    Protocol { key: String, value: String },
}

/// One watched key as seen when the watch began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedValue {
    pub key: String,
    /// Current value, `None` if the key is absent
    pub value: Option<String>,
    /// Opaque store-specific revision used to detect concurrent writes
    pub revision: u64,
}

/// The values read under a watch, handed back to the store on commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<WatchedValue>,
    /// Identifies store-side state held for this watch, such as a connection
    ticket: Option<u64>,
}

impl Snapshot {
    pub fn new(entries: Vec<WatchedValue>) -> Self {
        Self {
            entries,
            ticket: None,
        }
    }

    /// A snapshot tied to store-side state that `commit` or `discard` releases.
    pub fn with_ticket(entries: Vec<WatchedValue>, ticket: u64) -> Self {
        Self {
            entries,
            ticket: Some(ticket),
        }
    }

    pub fn ticket(&self) -> Option<u64> {
        self.ticket
    }

    /// The value of a watched key, `None` if absent or not watched.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| e.value.as_deref())
    }

    pub fn entries(&self) -> &[WatchedValue] {
        &self.entries
    }
}

/// Result of a conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All writes were applied atomically.
    Committed,
    /// A watched key changed since the snapshot; nothing was written.
    Conflict,
}

/// An atomic key-value store with optimistic transactions.
///
/// Implementations are shared between tasks and must be usable behind an
/// `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a single key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a single key unconditionally.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Begin watching `keys` and return their current values.
    async fn watch(&self, keys: &[String]) -> Result<Snapshot, StoreError>;

    /// Apply `writes` atomically if no key in `snapshot` changed since it was taken.
    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, String)>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Abandon a watch without writing.
    async fn discard(&self, _snapshot: Snapshot) -> Result<(), StoreError> {
        Ok(())
    }
}
