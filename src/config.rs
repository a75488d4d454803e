//! Configuration management for Turnstile.
//!
//! Limiters are declared by name in YAML:
//!
//! ```yaml
//! limiters:
//!   api:
//!     algorithm: token_bucket
//!     rate: 10
//!     burst: 4
//!   uploads:
//!     algorithm: leaky_bucket
//!     rate: 2
//!     bucket_size: 4
//!   login:
//!     algorithm: sliding_window
//!     limit: 3
//!     window_ms: 1000
//!   billing:
//!     algorithm: distributed_token_bucket
//!     rate: 2
//!     burst: 6
//!     client_id: "3213"
//! distributed:
//!   key_prefix: turnstile
//!   max_attempts: 5
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{
    ContentionPolicy, DistributedOptions, DistributedTokenBucketLimiter, KeyedRateLimiter,
    LeakyBucketConfig, LocalLimiter, LocalLimiterConfig, RateLimiterBackend, SlidingWindowConfig,
    TokenBucketConfig, DEFAULT_MAX_ATTEMPTS,
};
use crate::store::{KeySpace, Store};

/// Prefix for environment overrides, e.g. `TURNSTILE__DISTRIBUTED__MAX_ATTEMPTS`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Limiters indexed by name
    #[serde(default)]
    pub limiters: HashMap<String, LimiterSettings>,

    /// Settings shared by all distributed limiters
    #[serde(default)]
    pub distributed: DistributedSettings,
}

/// Parameters for one named limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterSettings {
    TokenBucket {
        rate: f64,
        burst: u32,
    },
    LeakyBucket {
        rate: f64,
        bucket_size: u32,
    },
    SlidingWindow {
        limit: u32,
        window_ms: u64,
    },
    DistributedTokenBucket {
        rate: f64,
        burst: u32,
        client_id: String,
    },
}

impl LimiterSettings {
    /// Validated parameters for an in-process limiter.
    ///
    /// Fails for `distributed_token_bucket`, which needs a store.
    pub fn to_local(&self) -> Result<LocalLimiterConfig> {
        match self {
            LimiterSettings::TokenBucket { rate, burst } => {
                Ok(TokenBucketConfig::new(*rate, *burst)?.into())
            }
            LimiterSettings::LeakyBucket { rate, bucket_size } => {
                Ok(LeakyBucketConfig::new(*rate, *bucket_size)?.into())
            }
            LimiterSettings::SlidingWindow { limit, window_ms } => {
                Ok(SlidingWindowConfig::new(*limit, Duration::from_millis(*window_ms))?.into())
            }
            LimiterSettings::DistributedTokenBucket { .. } => Err(TurnstileError::Config(
                "distributed_token_bucket cannot run as an in-process limiter".to_string(),
            )),
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, LimiterSettings::DistributedTokenBucket { .. })
    }

    /// Check the parameters without building anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterSettings::DistributedTokenBucket {
                rate,
                burst,
                client_id,
            } => {
                TokenBucketConfig::new(*rate, *burst)?;
                if client_id.is_empty() {
                    return Err(TurnstileError::InvalidConfiguration(
                        "client_id must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            _ => self.to_local().map(|_| ()),
        }
    }
}

/// Settings shared by all distributed limiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedSettings {
    /// Namespace prepended to every store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Commit attempts per call before failing closed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between commit attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Whether exhausted retries surface as a denial or an error
    #[serde(default)]
    pub contention_policy: ContentionPolicy,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            contention_policy: ContentionPolicy::default(),
        }
    }
}

fn default_key_prefix() -> String {
    "turnstile".to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    1
}

impl DistributedSettings {
    /// Options for a distributed limiter, with a fresh instance id.
    pub fn to_options(&self) -> Result<DistributedOptions> {
        if self.max_attempts < 2 {
            return Err(TurnstileError::InvalidConfiguration(format!(
                "distributed.max_attempts must be at least 2, got {}",
                self.max_attempts
            )));
        }
        Ok(DistributedOptions {
            key_space: KeySpace::new(self.key_prefix.clone())?,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            contention_policy: self.contention_policy,
            ..Default::default()
        })
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a file, overridden by `TURNSTILE__*` environment variables.
    ///
    /// Nested keys are separated by `__`, e.g.
    /// `TURNSTILE__DISTRIBUTED__CONTENTION_POLICY=error`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading layered configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Check every limiter and the distributed settings.
    pub fn validate(&self) -> Result<()> {
        for (name, limiter) in &self.limiters {
            limiter.validate().map_err(|e| match e {
                TurnstileError::InvalidConfiguration(msg) => {
                    TurnstileError::InvalidConfiguration(format!("limiter {}: {}", name, msg))
                }
                other => other,
            })?;
        }
        self.distributed.to_options().map(|_| ())
    }

    /// Settings for the limiter called `name`.
    pub fn limiter(&self, name: &str) -> Result<&LimiterSettings> {
        self.limiters
            .get(name)
            .ok_or_else(|| TurnstileError::Config(format!("unknown limiter: {}", name)))
    }

    /// Build the in-process limiter called `name`.
    pub fn local_limiter(&self, name: &str) -> Result<LocalLimiter> {
        Ok(self.limiter(name)?.to_local()?.build())
    }

    /// Build a per-client registry from the in-process limiter called `name`.
    pub fn keyed_limiter(&self, name: &str) -> Result<KeyedRateLimiter> {
        Ok(KeyedRateLimiter::new(self.limiter(name)?.to_local()?))
    }

    /// Attach the distributed limiter called `name` to `store`.
    ///
    /// Existing state in the store is kept, so every process can build its
    /// limiter from the same configuration.
    pub fn distributed_limiter(
        &self,
        name: &str,
        store: Arc<dyn Store>,
    ) -> Result<DistributedTokenBucketLimiter> {
        match self.limiter(name)? {
            LimiterSettings::DistributedTokenBucket {
                rate,
                burst,
                client_id,
            } => DistributedTokenBucketLimiter::attach(
                client_id,
                *rate,
                *burst,
                store,
                self.distributed.to_options()?,
            ),
            other => Err(TurnstileError::Config(format!(
                "limiter {} is not distributed: {:?}",
                name, other
            ))),
        }
    }

    /// Build the limiter called `name` behind the common backend trait.
    ///
    /// `store` is required only for distributed limiters.
    pub fn backend(
        &self,
        name: &str,
        store: Option<Arc<dyn Store>>,
    ) -> Result<Arc<dyn RateLimiterBackend>> {
        let settings = self.limiter(name)?;
        if !settings.is_distributed() {
            return Ok(Arc::new(settings.to_local()?.build()));
        }

        let store = store.ok_or_else(|| {
            TurnstileError::Config(format!("limiter {} requires a shared store", name))
        })?;
        Ok(Arc::new(self.distributed_limiter(name, store)?))
    }
}
