//! Domain layer - Core types, contracts and algorithms

pub mod analytics;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod key;
pub mod plugin;
pub mod rate_limit;

pub use analytics::AnalyticsSink;
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::RandomSource;
pub use error::{DomainError, ErrorCode, ErrorPayload};
pub use key::{
    CreateKeyInput, KeyId, KeyRecord, KeyStatus, KeyStore, Metadata, VerifyField, VerifyInput,
    VerifyOutcome,
};
pub use plugin::{Capability, CapabilityRegistry, Plugin, PluginError, PolicyDecision};
pub use rate_limit::{
    Atomicity, FixedWindowLimit, RateLimitResult, RateLimitRule, RateLimitStore,
    TokenBucketLimit,
};
