//! Token bucket limiter.
//!
//! Capacity refills continuously at `rate` tokens per second up to `burst`.
//! Refill is computed lazily on each call; there is no background task.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Result, TurnstileError};

use super::decision::Decision;
use super::validate_rate;

/// Validated token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    rate: f64,
    burst: u32,
}

impl TokenBucketConfig {
    /// Validate and build a configuration.
    ///
    /// `rate` is in tokens per second and must be finite and positive;
    /// `burst` must be at least one.
    pub fn new(rate: f64, burst: u32) -> Result<Self> {
        validate_rate(rate)?;
        if burst == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "burst must be at least 1".to_string(),
            ));
        }
        Ok(Self { rate, burst })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

/// The two scalars a token bucket carries between calls.
///
/// This is the state the distributed limiter materializes from the store, so
/// the advance rule lives here and is shared by both limiters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    /// Tokens available after the last write, in `[0, burst]`
    pub tokens: f64,
    /// Instant of the last admitted event, `None` before the first one
    pub last_update: Option<Timestamp>,
}

impl TokenBucketState {
    /// A bucket holding `burst` tokens.
    pub fn full(config: &TokenBucketConfig) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_update: None,
        }
    }

    /// Apply the refill-and-consume rule at `now`.
    ///
    /// Returns the decision together with the state to persist. This does not
    /// mutate `self`; calling it twice with the same inputs yields the same
    /// result. A denial zeroes the tokens but keeps `last_update`, so refill
    /// keeps accruing from the last admitted event.
    pub fn advance(
        &self,
        config: &TokenBucketConfig,
        now: Timestamp,
    ) -> (Decision, TokenBucketState) {
        let burst = f64::from(config.burst);
        let refilled = match self.last_update {
            Some(last) => {
                // A timestamp earlier than the last update counts as zero elapsed time.
                let effective_last = last.min(now);
                let elapsed = now.saturating_duration_since(effective_last);
                (self.tokens + elapsed.as_secs_f64() * config.rate).min(burst)
            }
            None => self.tokens.min(burst),
        };

        let remaining = refilled - 1.0;
        if remaining < 0.0 {
            let state = TokenBucketState {
                tokens: 0.0,
                last_update: self.last_update,
            };
            (Decision::deny(), state)
        } else {
            let state = TokenBucketState {
                tokens: remaining,
                last_update: Some(now),
            };
            (Decision::allow(), state)
        }
    }
}

/// An in-process token bucket.
///
/// This struct is thread-safe; every call holds the internal lock for its
/// whole read-compute-write sequence.
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    state: Mutex<TokenBucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a full bucket refilling at `rate` tokens per second.
    pub fn new(rate: f64, burst: u32) -> Result<Self> {
        Ok(Self::from_config(TokenBucketConfig::new(rate, burst)?))
    }

    /// Create a full bucket that reads time from `clock` in [`allow`](Self::allow).
    pub fn with_clock(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::from_config_with_clock(
            TokenBucketConfig::new(rate, burst)?,
            clock,
        ))
    }

    pub fn from_config(config: TokenBucketConfig) -> Self {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: Mutex::new(TokenBucketState::full(&config)),
            clock,
        }
    }

    /// Decide whether an event arriving at `now` may proceed.
    pub fn allow_at(&self, now: Timestamp) -> Decision {
        let mut state = self.state.lock();
        let (decision, next) = state.advance(&self.config, now);
        *state = next;

        if decision.allowed {
            trace!(now = %now, tokens = next.tokens, "Token bucket admitted event");
        } else {
            debug!(
                now = %now,
                rate = self.config.rate,
                burst = self.config.burst,
                "Token bucket exhausted"
            );
        }
        decision
    }

    /// Decide for an event arriving now, according to the limiter's clock.
    pub fn allow(&self) -> Decision {
        self.allow_at(self.clock.now())
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Events per second.
    pub fn rate(&self) -> f64 {
        self.config.rate
    }

    pub fn burst(&self) -> u32 {
        self.config.burst
    }

    /// Tokens stored after the most recent call, without refill applied.
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }

    /// A copy of the current state.
    pub fn state(&self) -> TokenBucketState {
        *self.state.lock()
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}
