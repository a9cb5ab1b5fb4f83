//! Rate limiting plugin

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::domain::key::{reason, KeyRecord, VerifyField, VerifyInput};
use crate::domain::plugin::{Capability, HookResult, Plugin, PluginError, PolicyDecision};
use crate::domain::rate_limit::{RateLimitResult, RateLimitRule, RateLimitStore};
use crate::domain::DomainError;

pub const RATE_LIMIT_PLUGIN: &str = "rate_limit";
pub const RATE_LIMITS_CAPABILITY: &str = "rateLimits";

/// Metadata entry that overrides the rule for a single key
pub const RATE_LIMIT_METADATA_KEY: &str = "rate_limit";

/// What a rate limit counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitIdentity {
    /// Each key has its own budget
    #[default]
    KeyId,
    /// Keys of the same owner share a budget; ownerless keys fall back to their ID
    OwnerId,
}

/// Rate limit operations, also exposed as the `rateLimits` capability
#[derive(Clone)]
pub struct RateLimits {
    store: Arc<dyn RateLimitStore>,
    rule: RateLimitRule,
    namespace: Option<String>,
    identity: RateLimitIdentity,
}

impl RateLimits {
    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Count one request under `rule`
    pub async fn apply(
        &self,
        namespace: &str,
        identifier: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitResult, DomainError> {
        match rule {
            RateLimitRule::FixedWindow(limit) => {
                self.store
                    .increment_and_check(namespace, identifier, limit)
                    .await
            }
            RateLimitRule::TokenBucket(limit) => {
                self.store
                    .consume_token_bucket(namespace, identifier, limit, 1.0)
                    .await
            }
        }
    }

    /// Report the default rule's state without spending from it
    pub async fn check(
        &self,
        namespace: &str,
        identifier: &str,
    ) -> Result<RateLimitResult, DomainError> {
        match &self.rule {
            RateLimitRule::FixedWindow(limit) => {
                self.store.check(namespace, identifier, limit).await
            }
            // A zero-cost consume only applies the pending refill
            RateLimitRule::TokenBucket(limit) => {
                self.store
                    .consume_token_bucket(namespace, identifier, limit, 0.0)
                    .await
            }
        }
    }

    pub async fn reset(&self, namespace: &str, identifier: &str) -> Result<(), DomainError> {
        self.store.reset(namespace, identifier).await
    }

    fn identifier<'a>(&self, record: &'a KeyRecord) -> &'a str {
        match self.identity {
            RateLimitIdentity::KeyId => record.id().as_str(),
            RateLimitIdentity::OwnerId => record
                .owner_id()
                .unwrap_or_else(|| record.id().as_str()),
        }
    }

    fn rule_for(&self, record: &KeyRecord) -> RateLimitRule {
        let Some(value) = record.metadata().get(RATE_LIMIT_METADATA_KEY) else {
            return self.rule;
        };

        match serde_json::from_value::<RateLimitRule>(value.clone()) {
            Ok(rule) if rule.validate().is_ok() => rule,
            _ => {
                warn!(key_id = %record.id(), "Ignoring invalid rate limit override");
                self.rule
            }
        }
    }
}

/// Rejects verification with `rate_limited` once a key spends its budget
///
/// Runs on `on_key_record_loaded`. Store failures are logged and let the
/// request through.
pub struct RateLimitPlugin {
    limits: Arc<RateLimits>,
}

impl RateLimitPlugin {
    pub fn new(store: Arc<dyn RateLimitStore>, rule: RateLimitRule) -> Self {
        Self {
            limits: Arc::new(RateLimits {
                store,
                rule,
                namespace: None,
                identity: RateLimitIdentity::default(),
            }),
        }
    }

    /// Fallback namespace, making `namespace` optional on verify
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.limits).namespace = Some(namespace.into());
        self
    }

    pub fn with_identity(mut self, identity: RateLimitIdentity) -> Self {
        Arc::make_mut(&mut self.limits).identity = identity;
        self
    }

    pub fn limits(&self) -> Arc<RateLimits> {
        self.limits.clone()
    }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        RATE_LIMIT_PLUGIN
    }

    fn required_verify_fields(&self) -> Vec<VerifyField> {
        if self.limits.namespace.is_some() {
            Vec::new()
        } else {
            vec![VerifyField::Namespace]
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::new(RATE_LIMITS_CAPABILITY, self.limits.clone())]
    }

    async fn setup(&self) -> Result<(), PluginError> {
        self.limits
            .rule
            .validate()
            .map_err(|e| PluginError::setup_failed(RATE_LIMIT_PLUGIN, e.to_string()))
    }

    async fn on_key_record_loaded(&self, input: &VerifyInput, record: &KeyRecord) -> HookResult {
        let namespace = input
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(self.limits.namespace.as_deref())
            .ok_or_else(|| {
                PluginError::configuration(RATE_LIMIT_PLUGIN, "no namespace to rate limit under")
            })?;

        let identifier = self.limits.identifier(record);
        let rule = self.limits.rule_for(record);

        let result = self.limits.apply(namespace, identifier, &rule).await?;

        let outcome = if result.success { "allowed" } else { "limited" };
        counter!(
            "keyward_rate_limit_decisions_total",
            "namespace" => namespace.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        if result.success {
            return Ok(None);
        }

        debug!(
            key_id = %record.id(),
            namespace = %namespace,
            reset_at = %result.reset_at,
            "Rate limit exceeded"
        );

        Ok(Some(PolicyDecision::reject(reason::RATE_LIMITED)))
    }
}
