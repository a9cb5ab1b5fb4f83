//! Analytics sink contract
//!
//! Events are emitted fire-and-forget: the key service never waits on a
//! sink and never propagates its failures.

use async_trait::async_trait;

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Event names emitted by the key service
pub mod event {
    pub const KEY_CREATED: &str = "key.created";
    pub const KEY_VERIFIED: &str = "key.verified";
    pub const KEY_REVOKED: &str = "key.revoked";
    pub const KEY_REMOVED: &str = "key.removed";
}

/// Destination for usage analytics
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn ready(&self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Record an event; payloads never contain key material
    async fn track(&self, event: &str, payload: serde_json::Value) -> Result<(), DomainError>;
}
