//! Fixed-window and token-bucket algorithms
//!
//! Pure state transitions over an explicit `now`. Backends own atomicity;
//! they load the state, call one of these functions inside their critical
//! section and persist what comes back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Longest fixed window, refill interval or projected refill time: 366 days
pub const MAX_WINDOW_MS: u64 = 366 * 24 * 60 * 60 * 1000;

/// Outcome of a rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub success: bool,
    /// Requests (fixed window) or whole tokens (token bucket) left
    pub remaining: u64,
    /// When the window resets, or when the bucket is projected to recover
    pub reset_at: DateTime<Utc>,
}

/// Persisted fixed-window counter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedWindowState {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Persisted token bucket; capacity and refill rate are supplied per call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub last_refill_at: DateTime<Utc>,
}

/// Fixed-window parameters: `limit` requests per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowLimit {
    pub limit: u64,
    pub window_ms: u64,
}

impl FixedWindowLimit {
    pub fn new(limit: u64, window: Duration) -> Result<Self, DomainError> {
        let limit = Self {
            limit,
            window_ms: u64::try_from(window.num_milliseconds()).unwrap_or(0),
        };
        limit.validate()?;
        Ok(limit)
    }

    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms.min(MAX_WINDOW_MS) as i64)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.window_ms == 0 {
            return Err(DomainError::validation(
                "fixed window duration must be positive",
            ));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(DomainError::validation(format!(
                "fixed window duration must not exceed {} ms",
                MAX_WINDOW_MS
            )));
        }
        Ok(())
    }
}

/// Token-bucket parameters: `refill_tokens` added every `refill_interval_ms`,
/// never exceeding `capacity`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketLimit {
    pub capacity: f64,
    pub refill_tokens: f64,
    pub refill_interval_ms: u64,
}

impl TokenBucketLimit {
    pub fn new(
        capacity: f64,
        refill_tokens: f64,
        refill_interval: Duration,
    ) -> Result<Self, DomainError> {
        let limit = Self {
            capacity,
            refill_tokens,
            refill_interval_ms: u64::try_from(refill_interval.num_milliseconds()).unwrap_or(0),
        };
        limit.validate()?;
        Ok(limit)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !(self.capacity.is_finite() && self.capacity > 0.0) {
            return Err(DomainError::validation("bucket capacity must be positive"));
        }
        if !(self.refill_tokens.is_finite() && self.refill_tokens > 0.0) {
            return Err(DomainError::validation("refill tokens must be positive"));
        }
        if self.refill_interval_ms == 0 || self.refill_interval_ms > MAX_WINDOW_MS {
            return Err(DomainError::validation(format!(
                "refill interval must be between 1 and {} ms",
                MAX_WINDOW_MS
            )));
        }
        if self.millis_to_accrue(self.capacity) > MAX_WINDOW_MS as i64 {
            return Err(DomainError::validation(format!(
                "an empty bucket must refill within {} ms",
                MAX_WINDOW_MS
            )));
        }
        Ok(())
    }

    /// A cost must be a finite, non-negative number of tokens
    pub fn validate_cost(&self, cost: f64) -> Result<(), DomainError> {
        if !(cost.is_finite() && cost >= 0.0) {
            return Err(DomainError::validation(format!(
                "token cost must be finite and non-negative, got {}",
                cost
            )));
        }
        Ok(())
    }

    /// Milliseconds needed to accrue `tokens` at this refill rate
    ///
    /// Saturates at `i64::MAX`; `f64 as i64` casts clamp.
    fn millis_to_accrue(&self, tokens: f64) -> i64 {
        if !(tokens > 0.0) {
            return 0;
        }
        (tokens / self.refill_tokens * self.refill_interval_ms as f64).ceil() as i64
    }
}

/// Either algorithm, as configured for a rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RateLimitRule {
    FixedWindow(FixedWindowLimit),
    TokenBucket(TokenBucketLimit),
}

impl RateLimitRule {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::FixedWindow(limit) => limit.validate(),
            Self::TokenBucket(limit) => limit.validate(),
        }
    }
}

/// Count one request against the window, starting a new window when the
/// previous one has elapsed
pub fn fixed_window_increment(
    state: Option<FixedWindowState>,
    now: DateTime<Utc>,
    limit: &FixedWindowLimit,
) -> (FixedWindowState, RateLimitResult) {
    let next = match state {
        Some(state) if state.reset_at > now => FixedWindowState {
            count: state.count.saturating_add(1),
            reset_at: state.reset_at,
        },
        _ => FixedWindowState {
            count: 1,
            reset_at: later(now, limit.window()),
        },
    };

    (next, fixed_window_outcome(&next, limit))
}

/// Result for a window that has just counted a request
pub fn fixed_window_outcome(state: &FixedWindowState, limit: &FixedWindowLimit) -> RateLimitResult {
    RateLimitResult {
        success: state.count <= limit.limit,
        remaining: limit.limit.saturating_sub(state.count),
        reset_at: state.reset_at,
    }
}

/// Report the window as it stands without counting a request
pub fn fixed_window_peek(
    state: Option<&FixedWindowState>,
    now: DateTime<Utc>,
    limit: &FixedWindowLimit,
) -> RateLimitResult {
    match state {
        Some(state) if state.reset_at > now => RateLimitResult {
            success: state.count < limit.limit,
            remaining: limit.limit.saturating_sub(state.count),
            reset_at: state.reset_at,
        },
        _ => RateLimitResult {
            success: limit.limit > 0,
            remaining: limit.limit,
            reset_at: later(now, limit.window()),
        },
    }
}

/// Refill lazily since the last call, then try to take `cost` tokens
///
/// A bucket seen for the first time starts full.
pub fn token_bucket_consume(
    state: Option<TokenBucketState>,
    now: DateTime<Utc>,
    limit: &TokenBucketLimit,
    cost: f64,
) -> (TokenBucketState, RateLimitResult) {
    let refilled = match state {
        Some(state) => {
            let elapsed_ms = (now - state.last_refill_at).num_milliseconds().max(0) as f64;
            let accrued = elapsed_ms / limit.refill_interval_ms as f64 * limit.refill_tokens;
            (state.tokens + accrued).clamp(0.0, limit.capacity)
        }
        None => limit.capacity,
    };

    let success = cost >= 0.0 && refilled >= cost;
    let tokens = if success { refilled - cost } else { refilled };

    let next = TokenBucketState {
        tokens,
        last_refill_at: now,
    };

    (next, token_bucket_outcome(&next, success, limit, cost))
}

/// Result for a bucket that was just refilled and charged at `last_refill_at`
///
/// `reset_at` is when one more request of `cost` fits if the bucket is short,
/// otherwise when it is full again.
pub fn token_bucket_outcome(
    state: &TokenBucketState,
    success: bool,
    limit: &TokenBucketLimit,
    cost: f64,
) -> RateLimitResult {
    let tokens = state.tokens;

    let wait_ms = if !success || tokens < cost {
        limit.millis_to_accrue(cost - tokens)
    } else {
        limit.millis_to_accrue(limit.capacity - tokens)
    };

    RateLimitResult {
        success,
        remaining: tokens.floor().max(0.0) as u64,
        reset_at: millis_after(state.last_refill_at, wait_ms),
    }
}

/// When a bucket left in `state` is back at capacity
///
/// From then on the state is indistinguishable from a fresh bucket.
pub fn token_bucket_full_at(state: &TokenBucketState, limit: &TokenBucketLimit) -> DateTime<Utc> {
    millis_after(
        state.last_refill_at,
        limit.millis_to_accrue(limit.capacity - state.tokens),
    )
}

/// `at + delta`, pinned to the latest representable instant on overflow
fn later(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn millis_after(at: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
    later(at, Duration::try_milliseconds(ms).unwrap_or(Duration::MAX))
}
