//! Per-client registry of in-process limiters.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock, Timestamp};

use super::decision::Decision;
use super::local::{LocalLimiter, LocalLimiterConfig};

/// Rate limits many clients with one limiter each, created on first use.
///
/// This struct is thread-safe and can be shared across multiple tasks. Calls
/// for different keys do not contend on a common lock.
pub struct KeyedRateLimiter {
    /// Limiters indexed by client key
    limiters: DashMap<String, Arc<LocalLimiter>>,
    /// Parameters every new limiter is built from
    config: LocalLimiterConfig,
    clock: Arc<dyn Clock>,
}

impl KeyedRateLimiter {
    pub fn new(config: LocalLimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LocalLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiters: DashMap::new(),
            config,
            clock,
        }
    }

    /// Decide for an event from `key` arriving at `now`.
    pub fn check_at(&self, key: &str, now: Timestamp) -> Decision {
        let limiter = self.limiter_for(key);
        let decision = limiter.allow_at(now);

        trace!(key = %key, allowed = decision.allowed, "Checked keyed rate limit");
        decision
    }

    /// Decide for an event from `key` arriving now.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, self.clock.now())
    }

    fn limiter_for(&self, key: &str) -> Arc<LocalLimiter> {
        if let Some(existing) = self.limiters.get(key) {
            return Arc::clone(existing.value());
        }

        // The shard lock is released before the limiter is used.
        let entry = self.limiters.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                algorithm = self.config.algorithm(),
                "Creating new rate limiter"
            );
            Arc::new(self.config.build_with_clock(Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    pub fn config(&self) -> &LocalLimiterConfig {
        &self.config
    }

    /// Forget a client's state. Returns `true` if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.limiters.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.limiters.contains_key(key)
    }

    /// Drop all limiters.
    pub fn clear(&self) {
        self.limiters.clear();
    }

    /// Number of clients with live state.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl std::fmt::Debug for KeyedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter")
            .field("config", &self.config)
            .field("clients", &self.limiters.len())
            .finish()
    }
}
