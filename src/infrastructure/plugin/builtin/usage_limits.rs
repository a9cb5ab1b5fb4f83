//! Usage limit plugin

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::key::{reason, KeyId, KeyRecord, KeyStore, UseSpend, VerifyInput};
use crate::domain::plugin::{Capability, HookResult, Plugin, PolicyDecision};
use crate::domain::DomainError;

pub const USAGE_LIMITS_PLUGIN: &str = "usage_limits";
pub const USAGE_LIMITS_CAPABILITY: &str = "usageLimits";

/// Usage budget operations, also exposed as the `usageLimits` capability
pub struct UsageLimits {
    store: Arc<dyn KeyStore>,
}

impl UsageLimits {
    /// Add `amount` uses to a limited key. Unlimited keys are left as they are.
    pub async fn top_up(
        &self,
        id: &KeyId,
        amount: i64,
    ) -> Result<Option<KeyRecord>, DomainError> {
        let Some(mut record) = self.store.find_key_by_id(id).await? else {
            return Ok(None);
        };

        if let Some(remaining) = record.uses_remaining() {
            record.set_uses_remaining(Some(remaining.max(0).saturating_add(amount)));
            self.store.update_key(&record).await?;
        }

        Ok(Some(record))
    }

    /// Replace the budget; `None` makes the key unlimited
    pub async fn set_remaining(
        &self,
        id: &KeyId,
        remaining: Option<i64>,
    ) -> Result<Option<KeyRecord>, DomainError> {
        let Some(mut record) = self.store.find_key_by_id(id).await? else {
            return Ok(None);
        };

        record.set_uses_remaining(remaining);
        self.store.update_key(&record).await?;

        Ok(Some(record))
    }
}

/// Spends one use per verification and rejects `usage_exceeded` at zero
///
/// The spend goes through [`KeyStore::spend_use`], so concurrent
/// verifications never overdraw and other fields of the record are left alone.
pub struct UsageLimitPlugin {
    limits: Arc<UsageLimits>,
}

impl UsageLimitPlugin {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            limits: Arc::new(UsageLimits { store }),
        }
    }

    pub fn limits(&self) -> Arc<UsageLimits> {
        self.limits.clone()
    }
}

#[async_trait]
impl Plugin for UsageLimitPlugin {
    fn name(&self) -> &str {
        USAGE_LIMITS_PLUGIN
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::new(USAGE_LIMITS_CAPABILITY, self.limits.clone())]
    }

    async fn on_key_record_loaded(&self, _input: &VerifyInput, record: &KeyRecord) -> HookResult {
        let Some(remaining) = record.uses_remaining() else {
            return Ok(None);
        };

        if remaining <= 0 {
            debug!(key_id = %record.id(), "Usage budget exhausted");
            return Ok(Some(PolicyDecision::reject(reason::USAGE_EXCEEDED)));
        }

        match self.limits.store.spend_use(record.id()).await? {
            UseSpend::Spent(left) => {
                debug!(key_id = %record.id(), uses_remaining = left, "Spent key use");
                Ok(None)
            }
            UseSpend::Unlimited => Ok(None),
            // Spent by a concurrent verification, or removed since it was loaded
            UseSpend::Exhausted | UseSpend::Missing => {
                debug!(key_id = %record.id(), "Usage budget exhausted");
                Ok(Some(PolicyDecision::reject(reason::USAGE_EXCEEDED)))
            }
        }
    }
}
