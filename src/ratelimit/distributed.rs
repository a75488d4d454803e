//! Distributed token bucket backed by a shared optimistic store.
//!
//! Several processes admit against one logical budget. Each keeps no local
//! state; `last` and `tokens` live in the store under the client's keys and
//! are updated with watch-then-conditional-commit transactions. Between the
//! read and the commit no process holds any exclusion, so contention shows up
//! as a failed commit, which is retried up to a configured bound.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Result, TurnstileError};
use crate::store::{BucketKeys, CommitOutcome, KeySpace, Snapshot, Store, StoreError};

use super::decision::Decision;
use super::token_bucket::{TokenBucketConfig, TokenBucketState};

/// Default number of commit attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay between commit attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// What a call reports once every commit attempt lost to another writer.
///
/// Both policies fail closed; they differ only in whether the caller can tell
/// contention apart from an ordinary denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionPolicy {
    /// Return a denial
    #[default]
    Deny,
    /// Return [`TurnstileError::Contention`]
    Error,
}

/// Tuning for the distributed limiter.
#[derive(Debug, Clone)]
pub struct DistributedOptions {
    /// Namespace for the client's store keys
    pub key_space: KeySpace,
    /// Commit attempts per call, at least 2
    pub max_attempts: u32,
    /// Base delay before retrying a lost commit. The actual delay is drawn
    /// uniformly from `[0, base * attempt]`; zero only yields to the runtime.
    pub retry_backoff: Duration,
    pub contention_policy: ContentionPolicy,
    /// Identifies this process in logs
    pub instance_id: String,
}

impl Default for DistributedOptions {
    fn default() -> Self {
        Self {
            key_space: KeySpace::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            contention_policy: ContentionPolicy::default(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A token bucket whose state is shared through a [`Store`].
pub struct DistributedTokenBucketLimiter {
    config: TokenBucketConfig,
    keys: BucketKeys,
    store: Arc<dyn Store>,
    options: DistributedOptions,
    clock: Arc<dyn Clock>,
}

impl DistributedTokenBucketLimiter {
    /// Create a limiter and write a full bucket for `client_id` to the store.
    ///
    /// This overwrites any state other processes have accumulated for the
    /// same client; use [`attach`](Self::attach) to join existing state.
    pub async fn new(
        client_id: &str,
        rate: f64,
        burst: u32,
        store: Arc<dyn Store>,
        options: DistributedOptions,
    ) -> Result<Self> {
        let limiter = Self::attach(client_id, rate, burst, store, options)?;
        limiter.reset().await?;
        Ok(limiter)
    }

    /// Create a limiter over whatever state the store holds for `client_id`.
    ///
    /// Missing keys read as an empty bucket last updated at the epoch, which
    /// refills to `burst` on the first call.
    pub fn attach(
        client_id: &str,
        rate: f64,
        burst: u32,
        store: Arc<dyn Store>,
        options: DistributedOptions,
    ) -> Result<Self> {
        let config = TokenBucketConfig::new(rate, burst)?;
        if options.max_attempts < 2 {
            return Err(TurnstileError::InvalidConfiguration(format!(
                "max_attempts must be at least 2 to allow retrying a lost commit, got {}",
                options.max_attempts
            )));
        }
        let keys = options.key_space.bucket(client_id)?;

        Ok(Self {
            config,
            keys,
            store,
            options,
            clock: Arc::new(SystemClock),
        })
    }

    /// Read time from `clock` in [`allow`](Self::allow).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Write a full bucket for this client.
    pub async fn reset(&self) -> Result<()> {
        self.store
            .set(&self.keys.last, Timestamp::ZERO.as_nanos().to_string())
            .await?;
        self.store
            .set(&self.keys.tokens, f64::from(self.config.burst()).to_string())
            .await?;

        info!(
            client_id = %self.keys.client_id(),
            burst = self.config.burst(),
            "Initialized distributed token bucket"
        );
        Ok(())
    }

    /// Read the bucket state currently held by the store.
    pub async fn snapshot_state(&self) -> Result<TokenBucketState> {
        let last = self.store.get(&self.keys.last).await?;
        let tokens = self.store.get(&self.keys.tokens).await?;
        Ok(self.parse_state(last.as_deref(), tokens.as_deref())?)
    }

    /// Decide whether an event arriving at `now` may proceed.
    ///
    /// Denials never write to the store. A store failure is returned as
    /// [`TurnstileError::StoreUnavailable`]; exhausted retries follow the
    /// configured [`ContentionPolicy`] and never admit.
    #[instrument(
        skip(self),
        fields(
            client_id = %self.keys.client_id(),
            instance_id = %self.options.instance_id
        )
    )]
    pub async fn allow_at(&self, now: Timestamp) -> Result<Decision> {
        let result = self.try_allow(now).await;
        if let Err(err) = &result {
            if err.is_store_unavailable() {
                warn!(error = %err, "Rate limit state could not be determined");
            }
        }
        result
    }

    pub async fn allow(&self) -> Result<Decision> {
        self.allow_at(self.clock.now()).await
    }

    async fn try_allow(&self, now: Timestamp) -> Result<Decision> {
        let watched = self.keys.watched();
        let max_attempts = self.options.max_attempts;

        for attempt in 1..=max_attempts {
            let snapshot = self.store.watch(&watched).await?;
            let state = match self.read_snapshot(&snapshot) {
                Ok(state) => state,
                Err(err) => {
                    // The parse error is the one worth reporting.
                    let _ = self.store.discard(snapshot).await;
                    return Err(err.into());
                }
            };

            let (decision, next) = state.advance(&self.config, now);
            if !decision.allowed {
                if let Err(err) = self.store.discard(snapshot).await {
                    debug!(error = %err, "Failed to release watch after denial");
                }
                debug!(now = %now, tokens = state.tokens, "Distributed bucket exhausted");
                return Ok(decision);
            }

            let writes = vec![
                (self.keys.last.clone(), now.as_nanos().to_string()),
                (self.keys.tokens.clone(), next.tokens.to_string()),
            ];
            match self.store.commit(snapshot, writes).await? {
                CommitOutcome::Committed => {
                    trace!(
                        now = %now,
                        tokens = next.tokens,
                        attempt,
                        "Distributed bucket admitted event"
                    );
                    return Ok(decision);
                }
                CommitOutcome::Conflict => {
                    debug!(attempt, max_attempts, "Lost optimistic commit");
                    if attempt < max_attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        warn!(
            attempts = max_attempts,
            policy = ?self.options.contention_policy,
            "Exhausted commit attempts, failing closed"
        );
        match self.options.contention_policy {
            ContentionPolicy::Deny => Ok(Decision::deny()),
            ContentionPolicy::Error => Err(TurnstileError::Contention {
                attempts: max_attempts,
            }),
        }
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.options.retry_backoff;
        if base.is_zero() {
            tokio::task::yield_now().await;
            return;
        }

        let ceiling =
            u64::try_from(base.saturating_mul(attempt).as_nanos()).unwrap_or(u64::MAX);
        let delay = rand::thread_rng().gen_range(0..=ceiling);
        tokio::time::sleep(Duration::from_nanos(delay)).await;
    }

    fn read_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> std::result::Result<TokenBucketState, StoreError> {
        self.parse_state(
            snapshot.get(&self.keys.last),
            snapshot.get(&self.keys.tokens),
        )
    }

    fn parse_state(
        &self,
        last: Option<&str>,
        tokens: Option<&str>,
    ) -> std::result::Result<TokenBucketState, StoreError> {
        let protocol = |key: &str, value: &str| StoreError::Protocol {
            key: key.to_string(),
            value: value.to_string(),
        };

        let last = match last {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| protocol(&self.keys.last, raw))?,
            None => 0,
        };
        let tokens = match tokens {
            Some(raw) => match raw.parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => value,
                _ => return Err(protocol(&self.keys.tokens, raw)),
            },
            None => 0.0,
        };

        Ok(TokenBucketState {
            tokens,
            last_update: Some(Timestamp::from_nanos(last)),
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    pub fn rate(&self) -> f64 {
        self.config.rate()
    }

    pub fn burst(&self) -> u32 {
        self.config.burst()
    }

    pub fn keys(&self) -> &BucketKeys {
        &self.keys
    }

    pub fn options(&self) -> &DistributedOptions {
        &self.options
    }
}

impl std::fmt::Debug for DistributedTokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTokenBucketLimiter")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(1_700_000_000_000 + millis)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn options() -> DistributedOptions {
        DistributedOptions {
            key_space: KeySpace::new("test").unwrap(),
            retry_backoff: Duration::ZERO,
            instance_id: "test-instance".to_string(),
            ..Default::default()
        }
    }

    /// Yields between watch and commit so callers polled together interleave
    /// their transactions.
    #[derive(Default)]
    struct InterleavingStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl Store for InterleavingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> std::result::Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn watch(&self, keys: &[String]) -> std::result::Result<Snapshot, StoreError> {
            let snapshot = self.inner.watch(keys).await;
            tokio::task::yield_now().await;
            snapshot
        }

        async fn commit(
            &self,
            snapshot: Snapshot,
            writes: Vec<(String, String)>,
        ) -> std::result::Result<CommitOutcome, StoreError> {
            let outcome = self.inner.commit(snapshot, writes).await?;
            if outcome == CommitOutcome::Conflict {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            Ok(outcome)
        }
    }

    /// Reports a conflict for the first `conflicts` commits.
    struct ConflictingStore {
        inner: MemoryStore,
        conflicts: AtomicU32,
        commits: AtomicU32,
    }

    impl ConflictingStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                conflicts: AtomicU32::new(conflicts),
                commits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Store for ConflictingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> std::result::Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn watch(&self, keys: &[String]) -> std::result::Result<Snapshot, StoreError> {
            self.inner.watch(keys).await
        }

        async fn commit(
            &self,
            snapshot: Snapshot,
            writes: Vec<(String, String)>,
        ) -> std::result::Result<CommitOutcome, StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Ok(CommitOutcome::Conflict);
            }
            self.inner.commit(snapshot, writes).await
        }
    }

    /// Works normally except that releasing a watch always fails.
    #[derive(Default)]
    struct StickyWatchStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for StickyWatchStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> std::result::Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn watch(&self, keys: &[String]) -> std::result::Result<Snapshot, StoreError> {
            self.inner.watch(keys).await
        }

        async fn commit(
            &self,
            snapshot: Snapshot,
            writes: Vec<(String, String)>,
        ) -> std::result::Result<CommitOutcome, StoreError> {
            self.inner.commit(snapshot, writes).await
        }

        async fn discard(&self, _snapshot: Snapshot) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    struct UnreachableStore;

    async fn drain(limiter: &DistributedTokenBucketLimiter, calls: usize) -> usize {
        let mut allowed = 0;
        for _ in 0..calls {
            if limiter.allow_at(at(0)).await.unwrap().allowed {
                allowed += 1;
            }
        }
        allowed
    }

    #[async_trait]
    impl Store for UnreachableStore {
        async fn get(&self, _key: &str) -> std::result::Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn watch(&self, _keys: &[String]) -> std::result::Result<Snapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn commit(
            &self,
            _snapshot: Snapshot,
            _writes: Vec<(String, String)>,
        ) -> std::result::Result<CommitOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_parameters() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let single_attempt = DistributedOptions {
            max_attempts: 1,
            ..options()
        };
        assert!(matches!(
            DistributedTokenBucketLimiter::attach("c", 2.0, 6, store.clone(), single_attempt),
            Err(TurnstileError::InvalidConfiguration(_))
        ));
        for (client_id, rate, burst) in [("c", 0.0, 6), ("c", 2.0, 0), ("", 2.0, 6)] {
            let result =
                DistributedTokenBucketLimiter::attach(client_id, rate, burst, store.clone(), options());
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn test_new_initializes_store() {
        let store = MemoryStore::new();
        let limiter =
            DistributedTokenBucketLimiter::new("3213", 2.0, 6, Arc::new(store.clone()), options())
                .await
                .unwrap();

        assert_eq!(store.get("test:3213:last").await.unwrap().as_deref(), Some("0"));
        assert_eq!(store.get("test:3213:tokens").await.unwrap().as_deref(), Some("6"));

        let state = limiter.snapshot_state().await.unwrap();
        assert_eq!(state.tokens, 6.0);
        assert_eq!(state.last_update, Some(Timestamp::ZERO));
    }

    #[tokio::test]
    async fn test_burst_then_refill() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = DistributedTokenBucketLimiter::new("client", 2.0, 6, store, options())
            .await
            .unwrap();

        for i in 0..6 {
            let decision = assert_ok!(limiter.allow_at(at(0)).await);
            assert!(decision.allowed, "call {} should be allowed", i);
        }
        assert!(limiter.allow_at(at(0)).await.unwrap().is_denied());

        // Two tokens per second
        assert!(limiter.allow_at(at(500)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(500)).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_denial_does_not_write() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = DistributedTokenBucketLimiter::new("client", 1.0, 1, store, options())
            .await
            .unwrap();

        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
        let before = limiter.snapshot_state().await.unwrap();

        assert!(limiter.allow_at(at(300)).await.unwrap().is_denied());
        assert_eq!(limiter.snapshot_state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_clock_skew_grants_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = DistributedTokenBucketLimiter::new("client", 10.0, 2, store, options())
            .await
            .unwrap();

        assert!(limiter.allow_at(at(10_000)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(10_000)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(5_000)).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_attach_shares_and_preserves_state() {
        let store = MemoryStore::new();
        let first =
            DistributedTokenBucketLimiter::new("shared", 1.0, 3, Arc::new(store.clone()), options())
                .await
                .unwrap();
        assert!(first.allow_at(at(0)).await.unwrap().allowed);
        assert!(first.allow_at(at(0)).await.unwrap().allowed);

        let second =
            DistributedTokenBucketLimiter::attach("shared", 1.0, 3, Arc::new(store), options())
                .unwrap();
        assert!(second.allow_at(at(0)).await.unwrap().allowed);
        assert!(second.allow_at(at(0)).await.unwrap().is_denied());
        assert!(first.allow_at(at(0)).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_missing_keys_read_as_full_bucket() {
        let store = MemoryStore::new();
        let limiter =
            DistributedTokenBucketLimiter::attach("fresh", 5.0, 2, Arc::new(store.clone()), options())
                .unwrap();

        assert!(store.is_empty());
        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(0)).await.unwrap().is_denied());

        // Evicted state starts over
        store.remove("test:fresh:last");
        store.remove("test:fresh:tokens");
        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_refills() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = DistributedTokenBucketLimiter::new("client", 1.0, 1, store, options())
            .await
            .unwrap();

        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
        assert!(limiter.allow_at(at(0)).await.unwrap().is_denied());

        limiter.reset().await.unwrap();
        assert!(limiter.allow_at(at(0)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_retries_after_conflicts() {
        let store = Arc::new(ConflictingStore::new(2));
        let limiter = DistributedTokenBucketLimiter::new("client", 2.0, 6, store.clone(), options())
            .await
            .unwrap();

        let decision = limiter.allow_at(at(0)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.snapshot_state().await.unwrap().tokens, 5.0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_closed_with_error() {
        let store = Arc::new(ConflictingStore::new(u32::MAX));
        let opts = DistributedOptions {
            contention_policy: ContentionPolicy::Error,
            ..options()
        };
        let limiter = DistributedTokenBucketLimiter::new("client", 2.0, 6, store.clone(), opts)
            .await
            .unwrap();

        let err = assert_err!(limiter.allow_at(at(0)).await);
        assert!(matches!(
            err,
            TurnstileError::Contention {
                attempts: DEFAULT_MAX_ATTEMPTS
            }
        ));
        assert_eq!(store.commits.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(limiter.snapshot_state().await.unwrap().tokens, 6.0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_closed_with_deny() {
        let store = Arc::new(ConflictingStore::new(u32::MAX));
        let opts = DistributedOptions {
            max_attempts: 3,
            ..options()
        };
        let limiter = DistributedTokenBucketLimiter::new("client", 2.0, 6, store.clone(), opts)
            .await
            .unwrap();

        let decision = limiter.allow_at(at(0)).await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_denial() {
        let store: Arc<dyn Store> = Arc::new(UnreachableStore);

        let err = DistributedTokenBucketLimiter::new("client", 2.0, 6, store.clone(), options())
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());

        let limiter =
            DistributedTokenBucketLimiter::attach("client", 2.0, 6, store, options()).unwrap();
        let err = limiter.allow_at(at(0)).await.unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::StoreUnavailable(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_release_keeps_denial() {
        let store = Arc::new(StickyWatchStore::default());
        let limiter = DistributedTokenBucketLimiter::new("sticky", 1.0, 1, store.clone(), options())
            .await
            .unwrap();

        assert!(assert_ok!(limiter.allow_at(at(0)).await).allowed);
        let decision = assert_ok!(limiter.allow_at(at(0)).await);
        assert!(decision.is_denied());
        assert_eq!(
            store.get("test:sticky:tokens").await.unwrap().as_deref(),
            Some("0")
        );
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let store = MemoryStore::new();
        let limiter =
            DistributedTokenBucketLimiter::new("client", 2.0, 6, Arc::new(store.clone()), options())
                .await
                .unwrap();

        store
            .set("test:client:tokens", "banana".to_string())
            .await
            .unwrap();
        let err = limiter.allow_at(at(0)).await.unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::StoreUnavailable(StoreError::Protocol { ref key, .. }) if key == "test:client:tokens"
        ));

        store.set("test:client:tokens", "-1".to_string()).await.unwrap();
        assert!(limiter.allow_at(at(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_interleaved_callers_do_not_double_spend() {
        init_tracing();
        let store = Arc::new(InterleavingStore::default());
        let opts = DistributedOptions {
            max_attempts: 10,
            ..options()
        };
        let a = DistributedTokenBucketLimiter::new("shared", 2.0, 6, store.clone(), opts.clone())
            .await
            .unwrap();
        let b =
            DistributedTokenBucketLimiter::attach("shared", 2.0, 6, store.clone(), opts).unwrap();

        let (from_a, from_b) = futures::join!(drain(&a, 10), drain(&b, 10));

        assert_eq!(from_a + from_b, 6);
        assert!(
            store.conflicts.load(Ordering::SeqCst) > 0,
            "retry path was not exercised"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_processes_never_exceed_budget() {
        init_tracing();
        let store = MemoryStore::new();
        let opts = DistributedOptions {
            max_attempts: 20,
            retry_backoff: Duration::from_micros(50),
            ..options()
        };
        DistributedTokenBucketLimiter::new("shared", 2.0, 6, Arc::new(store.clone()), opts.clone())
            .await
            .unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = DistributedTokenBucketLimiter::attach(
                    "shared",
                    2.0,
                    6,
                    Arc::new(store.clone()),
                    opts.clone(),
                )
                .unwrap();
                tokio::spawn(async move { drain(&limiter, 10).await })
            })
            .collect();

        let mut total = 0;
        for result in futures::future::join_all(tasks).await {
            total += result.unwrap();
        }
        assert!(total <= 6, "admitted {} events with a burst of 6", total);
        assert!(total > 0);
    }

    #[tokio::test]
    async fn test_allow_uses_clock() {
        let clock = ManualClock::new(at(0));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let limiter = DistributedTokenBucketLimiter::new("client", 1.0, 1, store, options())
            .await
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        assert!(limiter.allow().await.unwrap().allowed);
        assert!(limiter.allow().await.unwrap().is_denied());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow().await.unwrap().allowed);
    }
}
