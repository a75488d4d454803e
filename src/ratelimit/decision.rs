//! Admission decisions.

use std::time::Duration;

/// The outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// How long the caller must delay the admitted event.
    ///
    /// Only the leaky bucket reserves future slots; every other limiter
    /// reports zero.
    pub wait: Duration,
}

impl Decision {
    /// Admit immediately.
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    /// Admit, but the event must not take effect before `wait` has passed.
    pub const fn allow_after(wait: Duration) -> Self {
        Self {
            allowed: true,
            wait,
        }
    }

    /// Reject.
    pub const fn deny() -> Self {
        Self {
            allowed: false,
            wait: Duration::ZERO,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}
