//! Built-in plugins
//!
//! - `rate_limit` - fixed-window or token-bucket limits per key or owner
//! - `usage_limits` - spends `uses_remaining` on every verification
//! - `scopes` - checks requested scopes against the key's metadata

mod rate_limit;
mod scopes;
mod usage_limits;

pub use rate_limit::{
    RateLimitIdentity, RateLimitPlugin, RateLimits, RATE_LIMITS_CAPABILITY,
    RATE_LIMIT_METADATA_KEY, RATE_LIMIT_PLUGIN,
};
pub use scopes::{ScopePlugin, SCOPES_METADATA_KEY, SCOPES_PLUGIN};
pub use usage_limits::{
    UsageLimitPlugin, UsageLimits, USAGE_LIMITS_CAPABILITY, USAGE_LIMITS_PLUGIN,
};
