//! Rate limit domain
//!
//! Fixed-window and token-bucket algorithms defined once over explicit
//! state, and the store contract each backend implements with its own
//! atomicity strategy.

pub mod algorithm;
mod store;

pub use algorithm::{
    FixedWindowLimit, FixedWindowState, RateLimitResult, RateLimitRule, TokenBucketLimit,
    TokenBucketState,
};
pub use store::{rate_limit_key, Atomicity, RateLimitStore};

#[cfg(test)]
pub use store::MockRateLimitStore;
