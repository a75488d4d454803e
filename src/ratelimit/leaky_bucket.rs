//! Leaky bucket limiter (queue model).
//!
//! A single server drains a bounded queue at one event per `1 / rate`
//! seconds. Admission reserves the next completion slot and tells the caller
//! how long to wait for it; the limiter itself never sleeps.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Result, TurnstileError};

use super::decision::Decision;
use super::validate_rate;

/// Validated leaky bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyBucketConfig {
    rate: f64,
    bucket_size: u32,
    per_event: Duration,
}

impl LeakyBucketConfig {
    /// Validate and build a configuration.
    ///
    /// The service interval `1 / rate` is truncated to whole nanoseconds and
    /// must come out between one nanosecond and `u64::MAX` nanoseconds.
    pub fn new(rate: f64, bucket_size: u32) -> Result<Self> {
        validate_rate(rate)?;
        if bucket_size == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "bucket size must be at least 1".to_string(),
            ));
        }

        let nanos = (1e9 / rate).trunc();
        if nanos < 1.0 || nanos >= u64::MAX as f64 {
            return Err(TurnstileError::InvalidConfiguration(format!(
                "rate {} gives a service interval outside the nanosecond range",
                rate
            )));
        }

        Ok(Self {
            rate,
            bucket_size,
            per_event: Duration::from_nanos(nanos as u64),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    /// Time the server spends on one event.
    pub fn per_event(&self) -> Duration {
        self.per_event
    }

    /// Number of queued events still ahead of an arrival at `now`, given the
    /// completion time of the last admitted event.
    ///
    /// An event that is partly serviced still occupies its slot until it
    /// completes, so the backlog is rounded up to whole events.
    fn queue_depth(&self, last_completion: Option<Timestamp>, now: Timestamp) -> u128 {
        let effective_last = last_completion.map_or(now, |last| last.max(now));
        let backlog = effective_last.saturating_duration_since(now).as_nanos();
        let per_event = self.per_event.as_nanos();
        (backlog + per_event - 1) / per_event
    }
}

/// An in-process leaky bucket.
///
/// Only the completion time of the most recently admitted event is stored;
/// queue occupancy is derived from it on every call.
pub struct LeakyBucketLimiter {
    config: LeakyBucketConfig,
    last_completion: Mutex<Option<Timestamp>>,
    clock: Arc<dyn Clock>,
}

impl LeakyBucketLimiter {
    /// Create an empty queue serviced at `rate` events per second.
    pub fn new(rate: f64, bucket_size: u32) -> Result<Self> {
        Ok(Self::from_config(LeakyBucketConfig::new(rate, bucket_size)?))
    }

    pub fn with_clock(rate: f64, bucket_size: u32, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::from_config_with_clock(
            LeakyBucketConfig::new(rate, bucket_size)?,
            clock,
        ))
    }

    pub fn from_config(config: LeakyBucketConfig) -> Self {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: LeakyBucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            last_completion: Mutex::new(None),
            clock,
        }
    }

    /// Try to reserve a queue slot for an event arriving at `now`.
    ///
    /// On admission [`Decision::wait`] holds the delay until the reserved
    /// slot completes. A full queue is denied and leaves the state unchanged.
    pub fn allow_at(&self, now: Timestamp) -> Decision {
        let mut last_completion = self.last_completion.lock();

        let depth = self.config.queue_depth(*last_completion, now);
        if depth >= u128::from(self.config.bucket_size) {
            debug!(
                now = %now,
                depth = depth as u64,
                bucket_size = self.config.bucket_size,
                "Leaky bucket queue full"
            );
            return Decision::deny();
        }

        // The virtual queue cannot end before the arrival instant.
        let effective_last = last_completion.map_or(now, |last| last.max(now));
        let completion = effective_last + self.config.per_event;
        *last_completion = Some(completion);

        let wait = completion.saturating_duration_since(now);
        trace!(now = %now, depth = depth as u64, wait = ?wait, "Leaky bucket reserved slot");
        Decision::allow_after(wait)
    }

    pub fn allow(&self) -> Decision {
        self.allow_at(self.clock.now())
    }

    pub fn config(&self) -> &LeakyBucketConfig {
        &self.config
    }

    pub fn rate(&self) -> f64 {
        self.config.rate
    }

    pub fn bucket_size(&self) -> u32 {
        self.config.bucket_size
    }

    /// Completion time of the most recently admitted event.
    pub fn last_completion(&self) -> Option<Timestamp> {
        *self.last_completion.lock()
    }

    /// Events queued ahead of an arrival at `now`.
    pub fn queue_depth_at(&self, now: Timestamp) -> u64 {
        let depth = self.config.queue_depth(*self.last_completion.lock(), now);
        u64::try_from(depth).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Debug for LeakyBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeakyBucketLimiter")
            .field("config", &self.config)
            .field("last_completion", &*self.last_completion.lock())
            .finish()
    }
}
