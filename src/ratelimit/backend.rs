//! Rate limiter trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use crate::clock::Timestamp;
use crate::error::Result;

use super::decision::Decision;
use super::distributed::DistributedTokenBucketLimiter;
use super::leaky_bucket::LeakyBucketLimiter;
use super::local::LocalLimiter;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the in-process limiters and the
/// `DistributedTokenBucketLimiter` so callers can hold either behind an
/// `Arc<dyn RateLimiterBackend>`. In-process limiters never fail.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide for an event arriving at `now`.
    async fn check_at(&self, now: Timestamp) -> Result<Decision>;

    /// Decide for an event arriving now, according to the limiter's clock.
    async fn check(&self) -> Result<Decision>;
}

macro_rules! local_backend {
    ($limiter:ty) => {
        #[async_trait]
        impl RateLimiterBackend for $limiter {
            async fn check_at(&self, now: Timestamp) -> Result<Decision> {
                Ok(self.allow_at(now))
            }

            async fn check(&self) -> Result<Decision> {
                Ok(self.allow())
            }
        }
    };
}

local_backend!(TokenBucketLimiter);
local_backend!(LeakyBucketLimiter);
local_backend!(SlidingWindowLimiter);
local_backend!(LocalLimiter);

#[async_trait]
impl RateLimiterBackend for DistributedTokenBucketLimiter {
    async fn check_at(&self, now: Timestamp) -> Result<Decision> {
        self.allow_at(now).await
    }

    async fn check(&self) -> Result<Decision> {
        self.allow().await
    }
}
