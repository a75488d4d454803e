//! Turnstile - admission control primitives
//!
//! This crate decides, for each incoming request at a given instant, whether
//! it may proceed now. It provides an in-process token bucket, leaky bucket
//! and fixed window counter, plus a token bucket whose state is shared by
//! several processes through a store with optimistic transactions.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{Result, TurnstileError};
pub use ratelimit::{
    ContentionPolicy, Decision, DistributedOptions, DistributedTokenBucketLimiter,
    KeyedRateLimiter, LeakyBucketLimiter, LocalLimiter, LocalLimiterConfig, RateLimiterBackend,
    SlidingWindowLimiter, TokenBucketLimiter,
};
pub use store::{MemoryStore, Store};
#[cfg(feature = "redis")]
pub use store::RedisStore;
