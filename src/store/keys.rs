//! Key layout for per-client bucket state.

use crate::error::{Result, TurnstileError};

/// Namespace under which bucket state is stored.
///
/// Keys have the form `{prefix}:{client_id}:{field}` so limiter state cannot
/// collide with unrelated data in a shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(TurnstileError::InvalidConfiguration(
                "key prefix must not be empty".to_string(),
            ));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The pair of keys holding one client's token bucket.
    pub fn bucket(&self, client_id: &str) -> Result<BucketKeys> {
        if client_id.is_empty() {
            return Err(TurnstileError::InvalidConfiguration(
                "client id must not be empty".to_string(),
            ));
        }
        Ok(BucketKeys {
            client_id: client_id.to_string(),
            last: format!("{}:{}:last", self.prefix, client_id),
            tokens: format!("{}:{}:tokens", self.prefix, client_id),
        })
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            prefix: "turnstile".to_string(),
        }
    }
}

/// Store keys for a single client's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeys {
    client_id: String,
    /// Last update instant, integer nanoseconds since the UNIX epoch
    pub last: String,
    /// Remaining tokens, floating point
    pub tokens: String,
}

impl BucketKeys {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Both keys, in the order they are watched.
    pub fn watched(&self) -> [String; 2] {
        [self.last.clone(), self.tokens.clone()]
    }
}

impl std::fmt::Display for BucketKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.last, self.tokens)
    }
}
