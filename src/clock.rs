//! Time sources for the limiters.
//!
//! Every limiter takes an explicit [`Timestamp`] in its `allow_at` call and
//! only consults a [`Clock`] for the `allow()` convenience. Time is kept as
//! signed nanoseconds since the UNIX epoch so the same value can be written to
//! a shared store and compared across processes.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An instant expressed as nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The UNIX epoch.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from nanoseconds since the UNIX epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a timestamp from milliseconds since the UNIX epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Nanoseconds since the UNIX epoch.
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        if self.0 <= earlier.0 {
            Duration::ZERO
        } else {
            // i64 difference of two ordered values always fits in u64
            Duration::from_nanos(self.0.abs_diff(earlier.0))
        }
    }
}

fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_to_nanos(rhs)))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration_to_nanos(rhs)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A source of the current instant.
///
/// Implementations are not required to be monotonic; limiters clamp
/// timestamps that move backwards.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Out of range only after the year 2262.
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX);
        Timestamp(nanos)
    }
}

/// Manually driven clock for tests and simulations.
///
/// Cloning is cheap and clones share the same underlying instant, so a test
/// can hand one clone to a limiter and drive time with another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start.as_nanos())),
        }
    }

    /// Jump to an arbitrary instant, including one in the past.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_nanos(), Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        self.now.fetch_add(duration_to_nanos(delta), Ordering::SeqCst);
    }

    /// Move the clock backward, simulating skew.
    pub fn rewind(&self, delta: Duration) {
        self.now.fetch_sub(duration_to_nanos(delta), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}
