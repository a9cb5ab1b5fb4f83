//! PostgreSQL rate limit store
//!
//! Each operation runs in its own transaction: the row is created if missing
//! (`ON CONFLICT DO NOTHING`), locked with `SELECT .. FOR UPDATE`, advanced
//! with the shared algorithm and written back before commit.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::domain::rate_limit::algorithm::{
    fixed_window_increment, fixed_window_peek, token_bucket_consume,
};
use crate::domain::rate_limit::{
    rate_limit_key, FixedWindowLimit, FixedWindowState, RateLimitResult, RateLimitStore,
    TokenBucketLimit, TokenBucketState,
};
use crate::domain::{Clock, DomainError, SystemClock};

const WINDOWS_TABLE: &str = "keyward_rate_windows";
const BUCKETS_TABLE: &str = "keyward_rate_buckets";

/// PostgreSQL implementation of [`RateLimitStore`]
#[derive(Clone)]
pub struct PostgresRateLimitStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PostgresRateLimitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRateLimitStore")
            .field("windows_table", &WINDOWS_TABLE)
            .field("buckets_table", &BUCKETS_TABLE)
            .finish()
    }
}

impl PostgresRateLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn store_error(context: &str) -> impl FnOnce(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::rate_limit_store(format!("{}: {}", context, e))
}

#[async_trait]
impl RateLimitStore for PostgresRateLimitStore {
    async fn ready(&self) -> Result<(), DomainError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                count BIGINT NOT NULL,
                reset_at TIMESTAMPTZ NOT NULL
            )
            "#,
            WINDOWS_TABLE
        ))
        .execute(&self.pool)
        .await
        .map_err(store_error("Failed to create window table"))?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                tokens DOUBLE PRECISION NOT NULL,
                last_refill_at TIMESTAMPTZ NOT NULL
            )
            "#,
            BUCKETS_TABLE
        ))
        .execute(&self.pool)
        .await
        .map_err(store_error("Failed to create bucket table"))?;

        info!("PostgreSQL rate limit store ready");
        Ok(())
    }

    async fn increment_and_check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        let key = rate_limit_key(namespace, identifier)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_error("Failed to begin transaction"))?;

        // An elapsed placeholder window makes the algorithm start fresh
        sqlx::query(&format!(
            "INSERT INTO {} (key, count, reset_at) VALUES ($1, 0, $2) ON CONFLICT (key) DO NOTHING",
            WINDOWS_TABLE
        ))
        .bind(&key)
        .bind(DateTime::<Utc>::UNIX_EPOCH)
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to create window row"))?;

        let row = sqlx::query(&format!(
            "SELECT count, reset_at FROM {} WHERE key = $1 FOR UPDATE",
            WINDOWS_TABLE
        ))
        .bind(&key)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("Failed to lock window row"))?;

        let current = row_to_window(&row)?;
        let (next, result) = fixed_window_increment(Some(current), self.clock.now(), limit);

        sqlx::query(&format!(
            "UPDATE {} SET count = $2, reset_at = $3 WHERE key = $1",
            WINDOWS_TABLE
        ))
        .bind(&key)
        .bind(i64::try_from(next.count).unwrap_or(i64::MAX))
        .bind(next.reset_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to update window row"))?;

        tx.commit()
            .await
            .map_err(store_error("Failed to commit window update"))?;

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

        let row = sqlx::query(&format!(
            "SELECT count, reset_at FROM {} WHERE key = $1",
            WINDOWS_TABLE
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("Failed to read window row"))?;

        let current = row.as_ref().map(row_to_window).transpose()?;
        Ok(fixed_window_peek(current.as_ref(), self.clock.now(), limit))
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_error("Failed to begin transaction"))?;

        // A new bucket is inserted full, matching a bucket seen for the first time
        sqlx::query(&format!(
            "INSERT INTO {} (key, tokens, last_refill_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO NOTHING",
            BUCKETS_TABLE
        ))
        .bind(&key)
        .bind(limit.capacity)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to create bucket row"))?;

        let row = sqlx::query(&format!(
            "SELECT tokens, last_refill_at FROM {} WHERE key = $1 FOR UPDATE",
            BUCKETS_TABLE
        ))
        .bind(&key)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("Failed to lock bucket row"))?;

        let current = row_to_bucket(&row)?;
        let (next, result) = token_bucket_consume(Some(current), now, limit, cost);

        sqlx::query(&format!(
            "UPDATE {} SET tokens = $2, last_refill_at = $3 WHERE key = $1",
            BUCKETS_TABLE
        ))
        .bind(&key)
        .bind(next.tokens)
        .bind(next.last_refill_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to update bucket row"))?;

        tx.commit()
            .await
            .map_err(store_error("Failed to commit bucket update"))?;

        Ok(result)
    }

    async fn reset(&self, namespace: &str, identifier: &str) -> Result<(), DomainError> {
        let key = rate_limit_key(namespace, identifier)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_error("Failed to begin transaction"))?;

        for table in [WINDOWS_TABLE, BUCKETS_TABLE] {
            sqlx::query(&format!("DELETE FROM {} WHERE key = $1", table))
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(store_error("Failed to reset rate limit state"))?;
        }

        tx.commit()
            .await
            .map_err(store_error("Failed to commit reset"))?;

        Ok(())
    }
}

fn row_to_window(row: &sqlx::postgres::PgRow) -> Result<FixedWindowState, DomainError> {
    let count: i64 = row
        .try_get("count")
        .map_err(store_error("Failed to decode window count"))?;
    let reset_at: DateTime<Utc> = row
        .try_get("reset_at")
        .map_err(store_error("Failed to decode window reset"))?;

    Ok(FixedWindowState {
        count: u64::try_from(count).unwrap_or(0),
        reset_at,
    })
}

fn row_to_bucket(row: &sqlx::postgres::PgRow) -> Result<TokenBucketState, DomainError> {
    let tokens: f64 = row
        .try_get("tokens")
        .map_err(store_error("Failed to decode bucket tokens"))?;
    let last_refill_at: DateTime<Utc> = row
        .try_get("last_refill_at")
        .map_err(store_error("Failed to decode bucket refill time"))?;

    Ok(TokenBucketState {
        tokens,
        last_refill_at,
    })
}
