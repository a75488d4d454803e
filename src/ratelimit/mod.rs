//! Rate limiting algorithms and state management.

mod backend;
mod decision;
mod distributed;
mod keyed;
mod leaky_bucket;
mod local;
mod sliding_window;
mod token_bucket;

pub use backend::RateLimiterBackend;
pub use decision::Decision;
pub use distributed::{
    ContentionPolicy, DistributedOptions, DistributedTokenBucketLimiter, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_BACKOFF,
};
pub use keyed::KeyedRateLimiter;
pub use leaky_bucket::{LeakyBucketConfig, LeakyBucketLimiter};
pub use local::{LocalLimiter, LocalLimiterConfig};
pub use sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
pub use token_bucket::{TokenBucketConfig, TokenBucketLimiter, TokenBucketState};

use crate::error::{Result, TurnstileError};

/// Rates are events per second and must be finite and strictly positive.
fn validate_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(TurnstileError::InvalidConfiguration(format!(
            "rate must be a positive number of events per second, got {}",
            rate
        )))
    }
}
