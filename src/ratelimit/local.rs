//! A closed set of the in-process limiters.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock, Timestamp};

use super::decision::Decision;
use super::leaky_bucket::{LeakyBucketConfig, LeakyBucketLimiter};
use super::sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
use super::token_bucket::{TokenBucketConfig, TokenBucketLimiter};

/// Validated parameters for any in-process limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalLimiterConfig {
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
    SlidingWindow(SlidingWindowConfig),
}

impl LocalLimiterConfig {
    /// Build a fresh limiter using the system clock.
    pub fn build(&self) -> LocalLimiter {
        self.build_with_clock(Arc::new(SystemClock))
    }

    pub fn build_with_clock(&self, clock: Arc<dyn Clock>) -> LocalLimiter {
        match *self {
            LocalLimiterConfig::TokenBucket(config) => LocalLimiter::TokenBucket(
                TokenBucketLimiter::from_config_with_clock(config, clock),
            ),
            LocalLimiterConfig::LeakyBucket(config) => LocalLimiter::LeakyBucket(
                LeakyBucketLimiter::from_config_with_clock(config, clock),
            ),
            LocalLimiterConfig::SlidingWindow(config) => LocalLimiter::SlidingWindow(
                SlidingWindowLimiter::from_config_with_clock(config, clock),
            ),
        }
    }

    /// Short algorithm name, as used in configuration files.
    pub fn algorithm(&self) -> &'static str {
        match self {
            LocalLimiterConfig::TokenBucket(_) => "token_bucket",
            LocalLimiterConfig::LeakyBucket(_) => "leaky_bucket",
            LocalLimiterConfig::SlidingWindow(_) => "sliding_window",
        }
    }
}

impl From<TokenBucketConfig> for LocalLimiterConfig {
    fn from(config: TokenBucketConfig) -> Self {
        LocalLimiterConfig::TokenBucket(config)
    }
}

impl From<LeakyBucketConfig> for LocalLimiterConfig {
    fn from(config: LeakyBucketConfig) -> Self {
        LocalLimiterConfig::LeakyBucket(config)
    }
}

impl From<SlidingWindowConfig> for LocalLimiterConfig {
    fn from(config: SlidingWindowConfig) -> Self {
        LocalLimiterConfig::SlidingWindow(config)
    }
}

/// Any in-process limiter.
#[derive(Debug)]
pub enum LocalLimiter {
    TokenBucket(TokenBucketLimiter),
    LeakyBucket(LeakyBucketLimiter),
    SlidingWindow(SlidingWindowLimiter),
}

impl LocalLimiter {
    pub fn allow_at(&self, now: Timestamp) -> Decision {
        match self {
            LocalLimiter::TokenBucket(limiter) => limiter.allow_at(now),
            LocalLimiter::LeakyBucket(limiter) => limiter.allow_at(now),
            LocalLimiter::SlidingWindow(limiter) => limiter.allow_at(now),
        }
    }

    pub fn allow(&self) -> Decision {
        match self {
            LocalLimiter::TokenBucket(limiter) => limiter.allow(),
            LocalLimiter::LeakyBucket(limiter) => limiter.allow(),
            LocalLimiter::SlidingWindow(limiter) => limiter.allow(),
        }
    }
}
