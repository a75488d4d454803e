//! Redis-backed store.
//!
//! A watch is scoped to the connection that issued it, so every transaction
//! opens its own connection and parks it under the snapshot's ticket until
//! `commit` or `discard` hands it back. Plain reads and writes share one
//! lazily opened multiplexed connection.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tracing::{debug, trace};

use super::{CommitOutcome, Snapshot, Store, StoreError, WatchedValue};

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// A [`Store`] on a Redis server, using `WATCH` / `MULTI` / `EXEC`.
pub struct RedisStore {
    client: redis::Client,
    shared: Mutex<Option<MultiplexedConnection>>,
    pending: DashMap<u64, MultiplexedConnection>,
    next_ticket: AtomicU64,
}

impl RedisStore {
    /// Create a store for `url`, e.g. `redis://127.0.0.1:6379/`.
    ///
    /// No connection is made until the first call.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Ok(Self {
            client,
            shared: Mutex::new(None),
            pending: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        })
    }

    /// Transactions still waiting for `commit` or `discard`.
    pub fn pending_transactions(&self) -> usize {
        self.pending.len()
    }

    async fn shared(&self) -> Result<MultiplexedConnection, StoreError> {
        let cached = self.shared.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        *self.shared.lock() = Some(conn.clone());
        Ok(conn)
    }

    fn take_pending(&self, snapshot: &Snapshot) -> Option<MultiplexedConnection> {
        let ticket = snapshot.ticket()?;
        self.pending.remove(&ticket).map(|(_, conn)| conn)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.shared().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.shared().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn watch(&self, keys: &[String]) -> Result<Snapshot, StoreError> {
        if keys.is_empty() {
            return Ok(Snapshot::default());
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        redis::cmd("WATCH")
            .arg(keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let entries = keys
            .iter()
            .zip(values)
            .map(|(key, value)| WatchedValue {
                key: key.clone(),
                value,
                revision: 0,
            })
            .collect();

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(ticket, conn);
        trace!(ticket, "Watching keys");
        Ok(Snapshot::with_ticket(entries, ticket))
    }

    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, String)>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut conn = self.take_pending(&snapshot).ok_or_else(|| {
            StoreError::Unavailable("snapshot has no open watch on this store".to_string())
        })?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &writes {
            pipe.set(key, value).ignore();
        }

        // EXEC replies nil when a watched key changed.
        let reply: Option<()> = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        match reply {
            Some(()) => Ok(CommitOutcome::Committed),
            None => {
                debug!(ticket = ?snapshot.ticket(), "Transaction aborted by watched write");
                Ok(CommitOutcome::Conflict)
            }
        }
    }

    async fn discard(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let Some(mut conn) = self.take_pending(&snapshot) else {
            return Ok(());
        };
        redis::cmd("UNWATCH")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("client", &self.client)
            .field("pending", &self.pending.len())
            .finish()
    }
}
