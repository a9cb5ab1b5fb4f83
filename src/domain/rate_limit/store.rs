//! Rate limit store contract

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::algorithm::{FixedWindowLimit, RateLimitResult, TokenBucketLimit};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// How a backend guarantees the per-identifier critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    /// Every operation is a single critical section per (namespace, identifier)
    Atomic,
    /// Read and write are separate round trips; concurrent callers can race
    /// between them and admit more requests than the limit
    BestEffort,
}

impl Atomicity {
    pub fn is_atomic(&self) -> bool {
        matches!(self, Self::Atomic)
    }
}

impl fmt::Display for Atomicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

/// Storage key for a namespace and identifier pair
///
/// Namespaces may not contain `:`, so the first `:` always ends the
/// namespace; identifiers are free-form.
pub fn rate_limit_key(namespace: &str, identifier: &str) -> Result<String, DomainError> {
    if namespace.contains(':') {
        return Err(DomainError::validation(format!(
            "rate limit namespace must not contain ':': {}",
            namespace
        )));
    }
    Ok(format!("{}:{}", namespace, identifier))
}

/// Persistence and atomicity boundary for rate limit state
///
/// The algorithms are shared (see [`super::algorithm`]); each backend
/// decides how to run them as one critical section per
/// `(namespace, identifier)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Warm up connections, load scripts or create schema
    async fn ready(&self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Atomicity guarantee of this backend
    fn atomicity(&self) -> Atomicity {
        Atomicity::Atomic
    }

    /// Count one request in the fixed window and report whether it fits
    async fn increment_and_check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError>;

    /// Report the fixed window without counting a request
    async fn check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &FixedWindowLimit,
    ) -> Result<RateLimitResult, DomainError>;

    /// Refill and try to take `cost` tokens from the bucket
    async fn consume_token_bucket(
        &self,
        namespace: &str,
        identifier: &str,
        limit: &TokenBucketLimit,
        cost: f64,
    ) -> Result<RateLimitResult, DomainError>;

    /// Drop fixed-window and token-bucket state for the identifier
    async fn reset(&self, namespace: &str, identifier: &str) -> Result<(), DomainError>;
}
