//! Error types for Turnstile.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
///
/// A denied request is never an error: limiters report denials through
/// [`Decision`](crate::ratelimit::Decision). Errors are reserved for broken
/// configuration and for situations where no decision could be reached.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Limiter parameters that can never produce a usable limiter
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration source could not be loaded or referenced
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared store could not be reached or returned garbage
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Optimistic commits kept losing to other writers
    #[error("Could not commit after {attempts} attempts due to contention")]
    Contention { attempts: u32 },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Returns `true` if the rate limit state could not be determined because
    /// of contention. Callers must treat this as a denial.
    pub fn is_contention(&self) -> bool {
        matches!(self, TurnstileError::Contention { .. })
    }

    /// Returns `true` if the shared store failed.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, TurnstileError::StoreUnavailable(_))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
