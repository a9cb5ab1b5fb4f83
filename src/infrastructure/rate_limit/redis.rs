//! Redis rate limit store
//!
//! Scripted mode runs each algorithm as a Lua script through `EVALSHA`, so
//! the read-modify-write happens on the server in one step. Best-effort mode
//! is a plain GET/SET round trip for servers with scripting disabled.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{info, warn};

use crate::domain::rate_limit::algorithm::{
    fixed_window_increment, fixed_window_outcome, fixed_window_peek, token_bucket_consume,
    token_bucket_outcome,
};
use crate::domain::rate_limit::{
    rate_limit_key, Atomicity, FixedWindowLimit, FixedWindowState, RateLimitResult,
    RateLimitStore, TokenBucketLimit, TokenBucketState,
};
use crate::domain::{Clock, DomainError, SystemClock};

/// Starts a new window when the stored one has elapsed, then counts.
/// Returns the new `{count, reset_at_ms}`.
const FIXED_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
local reset_at = tonumber(redis.call('HGET', KEYS[1], 'reset_at'))
if count == nil or reset_at == nil or reset_at <= now then
  count = 1
  reset_at = now + window
else
  count = count + 1
end
redis.call('HSET', KEYS[1], 'count', count, 'reset_at', reset_at)
redis.call('PEXPIRE', KEYS[1], reset_at - now)
return {count, reset_at}
"#;

/// Lazy refill capped at capacity; a missing bucket starts full.
/// Returns `{allowed, tokens}` with tokens as a string to keep fractions.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local refill = tonumber(ARGV[3])
local interval = tonumber(ARGV[4])
local cost = tonumber(ARGV[5])
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last_refill_at'))
if tokens == nil or last == nil then
  tokens = capacity
else
  local elapsed = math.max(0, now - last)
  tokens = math.min(capacity, math.max(0, tokens + elapsed / interval * refill))
end
local allowed = 0
if tokens >= cost then
  tokens = tokens - cost
  allowed = 1
end
redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill_at', now)
redis.call('PEXPIRE', KEYS[1], math.ceil(capacity / refill * interval) + interval)
return {allowed, tostring(tokens)}
"#;

/// How the store runs its critical sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedisRateLimitMode {
    /// Server-side Lua scripts
    #[default]
    Scripted,
    /// GET then SET; concurrent callers can over-admit
    BestEffort,
}

/// Configuration for the Redis rate limit store
#[derive(Debug, Clone)]
pub struct RedisRateLimitConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Prefix of every key written by the store
    pub key_prefix: String,
    pub mode: RedisRateLimitMode,
    /// Refuse to run without atomic guarantees
    pub strict: bool,
}

impl Default for RedisRateLimitConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "keyward:rl".to_string(),
            mode: RedisRateLimitMode::default(),
            strict: false,
        }
    }
}

impl RedisRateLimitConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_mode(mut self, mode: RedisRateLimitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn atomicity(&self) -> Atomicity {
        match self.mode {
            RedisRateLimitMode::Scripted => Atomicity::Atomic,
            RedisRateLimitMode::BestEffort => Atomicity::BestEffort,
        }
    }

    /// Fails when strict mode is combined with the best-effort fallback
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.strict && !self.atomicity().is_atomic() {
            return Err(DomainError::unsupported(
                "strict rate limiting requires scripted Redis mode",
            ));
        }
        Ok(())
    }

    fn window_key(&self, namespace: &str, identifier: &str) -> Result<String, DomainError> {
        Ok(format!("{}:fw:{}", self.key_prefix, rate_limit_key(namespace, identifier)?))
    }

    fn bucket_key(&self, namespace: &str, identifier: &str) -> Result<String, DomainError> {
        Ok(format!("{}:tb:{}", self.key_prefix, rate_limit_key(namespace, identifier)?))
    }
}

/// Redis-backed [`RateLimitStore`], shared across processes
#[derive(Clone)]
pub struct RedisRateLimitStore {
    connection: ConnectionManager,
    config: RedisRateLimitConfig,
    clock: Arc<dyn Clock>,
    fixed_window: Arc<Script>,
    token_bucket: Arc<Script>,
}

impl fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRateLimitStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisRateLimitStore {
    /// Connect to Redis
    ///
    /// Best-effort mode logs a warning, or fails with `UNSUPPORTED_OPERATION`
    /// when `strict` is set.
    pub async fn connect(config: RedisRateLimitConfig) -> Result<Self, DomainError> {
        config.validate()?;

        if !config.atomicity().is_atomic() {
            warn!(
                url = %redact_url(&config.url),
                "Redis rate limiting in best-effort mode; concurrent requests may exceed limits"
            );
        }

        let client = Client::open(config.url.as_str()).map_err(|e| {
            DomainError::rate_limit_store(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            DomainError::rate_limit_store(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self {
            connection,
            config,
            clock: Arc::new(SystemClock),
            fixed_window: Arc::new(Script::new(FIXED_WINDOW_SCRIPT)),
            token_bucket: Arc::new(Script::new(TOKEN_BUCKET_SCRIPT)),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RedisRateLimitConfig {
        &self.config
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, DomainError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn.get(key).await.map_err(|e| {
            DomainError::rate_limit_store(format!("Failed to read '{}': {}", key, e))
        })?;

        // Unreadable state is treated as absent and overwritten
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_ms: i64,
    ) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();
        let raw = serde_json::to_string(value)
            .map_err(|e| DomainError::rate_limit_store(format!("Failed to encode state: {}", e)))?;

        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("PX")
            .arg(ttl_ms.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                DomainError::rate_limit_store(format!("Failed to write '{}': {}", key, e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn ready(&self) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DomainError::rate_limit_store(format!("Redis ping failed: {}", e)))?;

        if self.config.mode == RedisRateLimitMode::Scripted {
            for script in [&self.fixed_window, &self.token_bucket] {
                script
                    .prepare_invoke()
                    .load_async(&mut conn)
                    .await
                    .map_err(|e| {
                        DomainError::rate_limit_store(format!(
                            "Failed to load rate limit script: {}",
                            e
                        ))
                    })?;
            }
        }

        info!(mode = ?self.config.mode, "Redis rate limit store ready");
        Ok(())
    }

    fn atomicity(&self) -> Atomicity {
        self.config.atomicity()
    }

    async fn increment_and_check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        let key = self.config.window_key(namespace, identifier)?;
        let now = self.clock.now();

        match self.config.mode {
            RedisRateLimitMode::Scripted => {
                let mut conn = self.connection.clone();

                let (count, reset_at_ms): (u64, i64) = self
                    .fixed_window
                    .key(&key)
                    .arg(now.timestamp_millis())
                    .arg(limit.window_ms)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| {
                        DomainError::rate_limit_store(format!("Fixed window script failed: {}", e))
                    })?;

                let state = FixedWindowState {
                    count,
                    reset_at: from_millis(reset_at_ms)?,
                };

                Ok(fixed_window_outcome(&state, limit))
            }
            RedisRateLimitMode::BestEffort => {
                let current = self.get_json::<FixedWindowState>(&key).await?;
                let (next, result) = fixed_window_increment(current, now, limit);

                let ttl_ms = (next.reset_at - now).num_milliseconds();
                self.set_json(&key, &next, ttl_ms).await?;

                Ok(result)
            }
        }
    }

    async fn check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError> {
        limit.validate()?;
        let key = self.config.window_key(namespace, identifier)?;
        let now = self.clock.now();

        let state = match self.config.mode {
            RedisRateLimitMode::Scripted => {
                let mut conn = self.connection.clone();

                let (count, reset_at): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
                    .arg(&key)
                    .arg("count")
                    .arg("reset_at")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| {
                        DomainError::rate_limit_store(format!("Failed to read '{}': {}", key, e))
                    })?;

                match (count, reset_at) {
                    (Some(count), Some(reset_at)) => Some(FixedWindowState {
                        count,
                        reset_at: from_millis(reset_at)?,
                    }),
                    _ => None,
                }
            }
            RedisRateLimitMode::BestEffort => self.get_json::<FixedWindowState>(&key).await?,
        };

        Ok(fixed_window_peek(state.as_ref(), now, limit))
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
        let key = self.config.bucket_key(namespace, identifier)?;
        let now = self.clock.now();

        match self.config.mode {
            RedisRateLimitMode::Scripted => {
                let mut conn = self.connection.clone();

                let (allowed, tokens): (i64, String) = self
                    .token_bucket
                    .key(&key)
                    .arg(now.timestamp_millis())
                    .arg(limit.capacity)
                    .arg(limit.refill_tokens)
                    .arg(limit.refill_interval_ms)
                    .arg(cost)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| {
                        DomainError::rate_limit_store(format!("Token bucket script failed: {}", e))
                    })?;

                let tokens: f64 = tokens.parse().map_err(|e| {
                    DomainError::rate_limit_store(format!("Invalid token count '{}': {}", tokens, e))
                })?;

                let state = TokenBucketState {
                    tokens,
                    last_refill_at: now,
                };

                Ok(token_bucket_outcome(&state, allowed == 1, limit, cost))
            }
            RedisRateLimitMode::BestEffort => {
                let current = self.get_json::<TokenBucketState>(&key).await?;
                let (next, result) = token_bucket_consume(current, now, limit, cost);

                let ttl_ms = (limit.capacity / limit.refill_tokens * limit.refill_interval_ms as f64)
                    .ceil() as i64
                    + limit.refill_interval_ms as i64;
                self.set_json(&key, &next, ttl_ms).await?;

                Ok(result)
            }
        }
    }

    async fn reset(&self, namespace: &str, identifier: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();
        let keys = vec![
            self.config.window_key(namespace, identifier)?,
            self.config.bucket_key(namespace, identifier)?,
        ];

        let _: i64 = conn.del(&keys).await.map_err(|e| {
            DomainError::rate_limit_store(format!("Failed to reset rate limit state: {}", e))
        })?;

        Ok(())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DomainError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DomainError::rate_limit_store(format!("Invalid timestamp: {}", ms)))
}

/// Strip credentials from a connection URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
