//! In-memory rate limit store

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::rate_limit::algorithm::{
    fixed_window_increment, fixed_window_peek, token_bucket_consume, token_bucket_full_at,
};
use crate::domain::rate_limit::{
    rate_limit_key, FixedWindowLimit, FixedWindowState, RateLimitResult, RateLimitStore,
    TokenBucketLimit, TokenBucketState,
};
use crate::domain::{Clock, DomainError, SystemClock};

/// How often a write also prunes stale entries
const PRUNE_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: TokenBucketState,
    /// Past this instant the bucket is full and can be dropped
    full_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Buckets {
    windows: HashMap<String, FixedWindowState>,
    tokens: HashMap<String, StoredBucket>,
    next_prune_at: Option<DateTime<Utc>>,
}

impl Buckets {
    /// Drop elapsed windows and refilled buckets; both read as absent
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len() + self.tokens.len();
        self.windows.retain(|_, window| window.reset_at > now);
        self.tokens.retain(|_, bucket| bucket.full_at > now);
        self.next_prune_at = Some(now + Duration::seconds(PRUNE_INTERVAL_SECS));
        before - (self.windows.len() + self.tokens.len())
    }

    fn prune_if_due(&mut self, now: DateTime<Utc>) {
        if self.next_prune_at.is_none_or(|at| at <= now) {
            let removed = self.prune(now);
            if removed > 0 {
                debug!(removed, "Pruned stale rate limit state");
            }
        }
    }
}

/// Process-local [`RateLimitStore`]
///
/// One mutex guards all state, so every read-modify-write is atomic within
/// the process. Not shared across instances. Stale entries are pruned on
/// writes at most once per minute.
pub struct InMemoryRateLimitStore {
    state: Mutex<Buckets>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(Buckets::default()),
            clock,
        }
    }

    /// Drop elapsed windows and refilled buckets now
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().await.prune(now)
    }

    /// Tracked windows and buckets
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.windows.len() + state.tokens.len()
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryRateLimitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRateLimitStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment_and_check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        let key = rate_limit_key(namespace, identifier)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        state.prune_if_due(now);

        let current = state.windows.get(&key).copied();
        let (next, result) = fixed_window_increment(current, now, limit);
        state.windows.insert(key, next);

        Ok(result)
    }

    async fn check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        let key = rate_limit_key(namespace, identifier)?;

        let state = self.state.lock().await;
        Ok(fixed_window_peek(
            state.windows.get(&key),
            self.clock.now(),
            limit,
        ))
    }

    async fn consume_token_bucket(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &TokenBucketLimit,
        cost: f64,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        limit.validate_cost(cost)?;
        let key = rate_limit_key(namespace, identifier)?;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        state.prune_if_due(now);

        let current = state.tokens.get(&key).map(|bucket| bucket.state);
        let (next, result) = token_bucket_consume(current, now, limit, cost);
        state.tokens.insert(
            key,
            StoredBucket {
                state: next,
                full_at: token_bucket_full_at(&next, limit),
            },
        );

        Ok(result)
    }

    async fn reset(&self, namespace: &str, identifier: &str) -> Result<(), DomainError> {
        let key = rate_limit_key(namespace, identifier)?;

        let mut state = self.state.lock().await;
        state.windows.remove(&key);
        state.tokens.remove(&key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::domain::{Atomicity, ManualClock};

    fn store() -> (InMemoryRateLimitStore, ManualClock) {
        let clock = ManualClock::starting_now();
        (
            InMemoryRateLimitStore::with_clock(Arc::new(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn test_fixed_window_lifecycle() {
        let (store, clock) = store();
        let limit = FixedWindowLimit::new(3, Duration::seconds(60)).unwrap();

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let result = store.increment_and_check("api", "k1", &limit).await.unwrap();
            assert!(result.success);
            remaining.push(result.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let blocked = store.increment_and_check("api", "k1", &limit).await.unwrap();
        assert!(!blocked.success);

        clock.set(blocked.reset_at);

        let restarted = store.increment_and_check("api", "k1", &limit).await.unwrap();
        assert!(restarted.success);
        assert_eq!(restarted.remaining, 2);
    }

    #[tokio::test]
    async fn test_check_has_no_side_effects() {
        let (store, _clock) = store();
        let limit = FixedWindowLimit::new(2, Duration::seconds(60)).unwrap();

        store.increment_and_check("api", "k1", &limit).await.unwrap();

        for _ in 0..5 {
            let peek = store.check("api", "k1", &limit).await.unwrap();
            assert!(peek.success);
            assert_eq!(peek.remaining, 1);
        }
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let (store, _clock) = store();
        let limit = FixedWindowLimit::new(1, Duration::seconds(60)).unwrap();

        assert!(store.increment_and_check("api", "k1", &limit).await.unwrap().success);
        assert!(store.increment_and_check("admin", "k1", &limit).await.unwrap().success);
        assert!(!store.increment_and_check("api", "k1", &limit).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_token_bucket_refills_over_time() {
        let (store, clock) = store();
        let limit = TokenBucketLimit::new(2.0, 1.0, Duration::seconds(1)).unwrap();

        assert!(store.consume_token_bucket("api", "k1", &limit, 1.0).await.unwrap().success);
        assert!(store.consume_token_bucket("api", "k1", &limit, 1.0).await.unwrap().success);

        for _ in 0..3 {
            let denied = store.consume_token_bucket("api", "k1", &limit, 1.0).await.unwrap();
            assert!(!denied.success);
        }

        clock.advance(Duration::milliseconds(500));
        assert!(!store.consume_token_bucket("api", "k1", &limit, 1.0).await.unwrap().success);

        clock.advance(Duration::milliseconds(500));
        let refilled = store.consume_token_bucket("api", "k1", &limit, 1.0).await.unwrap();
        assert!(refilled.success);
        assert_eq!(refilled.remaining, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_both_algorithms() {
        let (store, _clock) = store();
        let window = FixedWindowLimit::new(1, Duration::seconds(60)).unwrap();
        let bucket = TokenBucketLimit::new(1.0, 1.0, Duration::seconds(60)).unwrap();

        store.increment_and_check("api", "k1", &window).await.unwrap();
        store.consume_token_bucket("api", "k1", &bucket, 1.0).await.unwrap();

        store.reset("api", "k1").await.unwrap();

        assert!(store.increment_and_check("api", "k1", &window).await.unwrap().success);
        assert!(store.consume_token_bucket("api", "k1", &bucket, 1.0).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_limit() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let limit = FixedWindowLimit::new(10, Duration::seconds(60)).unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment_and_check("api", "shared", &limit)
                        .await
                        .unwrap()
                        .success
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(store.atomicity(), Atomicity::Atomic);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store();
        let window = FixedWindowLimit::new(5, Duration::seconds(10)).unwrap();
        let bucket = TokenBucketLimit::new(2.0, 1.0, Duration::seconds(30)).unwrap();

        store.increment_and_check("api", "k1", &window).await.unwrap();
        store.consume_token_bucket("api", "k1", &bucket, 1.0).await.unwrap();
        assert_eq!(store.purge_expired().await, 0);

        clock.advance(Duration::seconds(10));
        assert_eq!(store.purge_expired().await, 1);

        clock.advance(Duration::seconds(20));
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_writes_prune_refilled_buckets() {
        let (store, clock) = store();
        let bucket = TokenBucketLimit::new(1.0, 1.0, Duration::seconds(1)).unwrap();

        for id in ["k1", "k2", "k3"] {
            store.consume_token_bucket("api", id, &bucket, 1.0).await.unwrap();
        }
        assert_eq!(store.len().await, 3);

        clock.advance(Duration::seconds(PRUNE_INTERVAL_SECS));
        store.consume_token_bucket("api", "k4", &bucket, 1.0).await.unwrap();
        assert_eq!(store.len().await, 1);

        // A pruned bucket comes back full, exactly as the refill would have left it
        assert!(store.consume_token_bucket("api", "k1", &bucket, 1.0).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_invalid_cost_rejected() {
        let (store, _clock) = store();
        let bucket = TokenBucketLimit::new(5.0, 1.0, Duration::seconds(1)).unwrap();

        for cost in [-100.0, f64::NAN, f64::INFINITY] {
            let err = store
                .consume_token_bucket("api", "k1", &bucket, cost)
                .await
                .unwrap_err();
            assert_eq!(err.code(), crate::domain::ErrorCode::ValidationFailed);
        }

        let result = store.consume_token_bucket("api", "k1", &bucket, 1.0).await.unwrap();
        assert_eq!(result.remaining, 4);
    }

    #[tokio::test]
    async fn test_namespace_with_separator_rejected() {
        let (store, _clock) = store();
        let limit = FixedWindowLimit::new(1, Duration::seconds(60)).unwrap();

        let err = store
            .increment_and_check("api:v2", "k1", &limit)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::domain::ErrorCode::ValidationFailed);
        assert!(store.increment_and_check("api", "v2:k1", &limit).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_invalid_limit_rejected() {
        let (store, _clock) = store();
        let limit = FixedWindowLimit {
            limit: 5,
            window_ms: 0,
        };

        let err = store.check("api", "k1", &limit).await.unwrap_err();
        assert_eq!(err.code(), crate::domain::ErrorCode::ValidationFailed);
    }
}
