//! Fixed window counter.
//!
//! Up to `limit` events are admitted per window of `window_size`. A window
//! opens at the first call after the previous one expired, and the reset is
//! evaluated before consumption on every call, admitted or not. Because the
//! count resets on a boundary rather than rolling, up to `2 * limit` events
//! can cluster around a boundary.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Result, TurnstileError};

use super::decision::Decision;

/// Validated window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    limit: u32,
    window_size: Duration,
}

impl SlidingWindowConfig {
    pub fn new(limit: u32, window_size: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "window limit must be at least 1".to_string(),
            ));
        }
        if window_size.is_zero() {
            return Err(TurnstileError::InvalidConfiguration(
                "window size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { limit, window_size })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    /// Events still admissible in the current window
    tokens_remaining: u32,
    /// When the current window opened, `None` until the first call
    window_start: Option<Timestamp>,
}

/// An in-process fixed window counter.
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    state: Mutex<WindowState>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Admit up to `limit` events per `window_size`.
    pub fn new(limit: u32, window_size: Duration) -> Result<Self> {
        Ok(Self::from_config(SlidingWindowConfig::new(limit, window_size)?))
    }

    pub fn with_clock(limit: u32, window_size: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::from_config_with_clock(
            SlidingWindowConfig::new(limit, window_size)?,
            clock,
        ))
    }

    pub fn from_config(config: SlidingWindowConfig) -> Self {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: Mutex::new(WindowState {
                tokens_remaining: 0,
                window_start: None,
            }),
            clock,
        }
    }

    /// Decide whether an event arriving at `now` may proceed.
    pub fn allow_at(&self, now: Timestamp) -> Decision {
        let mut state = self.state.lock();

        let expired = match state.window_start {
            Some(start) => {
                let effective_start = start.min(now);
                now.saturating_duration_since(effective_start) > self.config.window_size
            }
            None => true,
        };
        if expired {
            trace!(now = %now, previous = ?state.window_start, "Opening new window");
            state.window_start = Some(now);
            state.tokens_remaining = self.config.limit;
        }

        match state.tokens_remaining.checked_sub(1) {
            Some(remaining) => {
                state.tokens_remaining = remaining;
                trace!(now = %now, remaining = remaining, "Window admitted event");
                Decision::allow()
            }
            None => {
                state.tokens_remaining = 0;
                debug!(now = %now, limit = self.config.limit, "Window limit exceeded");
                Decision::deny()
            }
        }
    }

    pub fn allow(&self) -> Decision {
        self.allow_at(self.clock.now())
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    pub fn limit(&self) -> u32 {
        self.config.limit
    }

    pub fn window_size(&self) -> Duration {
        self.config.window_size
    }

    /// When the current window opened.
    pub fn window_start(&self) -> Option<Timestamp> {
        self.state.lock().window_start
    }

    /// Events still admissible in the current window, as of the last call.
    pub fn tokens_remaining(&self) -> u32 {
        self.state.lock().tokens_remaining
    }

    /// Time from `now` until a call would open a fresh window.
    pub fn duration_until_reset(&self, now: Timestamp) -> Duration {
        match self.state.lock().window_start {
            Some(start) => {
                // The reset fires once elapsed time strictly exceeds the window.
                let boundary = start + self.config.window_size + Duration::from_nanos(1);
                boundary.saturating_duration_since(now)
            }
            None => Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}
