//! keyward
//!
//! API key issuance and verification with:
//! - Prefixed keys hashed with SHA-256 or HMAC-SHA256 before storage
//! - Pluggable key stores (in-memory, PostgreSQL)
//! - Fixed-window and token-bucket rate limiting (in-memory, Redis, PostgreSQL)
//! - Ordered policy hooks for usage limits, scopes and custom rules

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::{
    CreateKeyInput, DomainError, ErrorCode, KeyId, KeyRecord, KeyStore, Plugin, RateLimitRule,
    RateLimitStore, VerifyInput, VerifyOutcome,
};
pub use infrastructure::key::{CreatedKey, KeyService, KeyServiceBuilder, KeyServiceConfig};
