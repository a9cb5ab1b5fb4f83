//! Plugin trait
//!
//! A plugin implements any subset of the lifecycle hooks; the defaults do
//! nothing and let the operation continue.

use async_trait::async_trait;

use super::capability::Capability;
use super::decision::PolicyDecision;
use super::error::PluginError;
use crate::domain::key::{CreateKeyInput, KeyRecord, VerifyField, VerifyInput};

/// Return type of every decision-producing hook
pub type HookResult = Result<Option<PolicyDecision>, PluginError>;

/// A named extension observing or vetoing key operations
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name, used in logs and in `PLUGIN_BLOCKED` errors
    fn name(&self) -> &str;

    /// Verify-input fields this plugin cannot work without
    fn required_verify_fields(&self) -> Vec<VerifyField> {
        Vec::new()
    }

    /// Typed operation bundles merged into the service's capability registry
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// One-time initialisation while the service is being built.
    /// Failures are logged and never abort construction.
    async fn setup(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn before_create_key(&self, _input: &CreateKeyInput) -> HookResult {
        Ok(None)
    }

    async fn on_key_created(&self, _record: &KeyRecord) -> HookResult {
        Ok(None)
    }

    async fn before_verify(&self, _input: &VerifyInput) -> HookResult {
        Ok(None)
    }

    /// Runs after the revocation check with the freshly loaded record
    async fn on_key_record_loaded(&self, _input: &VerifyInput, _record: &KeyRecord) -> HookResult {
        Ok(None)
    }

    async fn on_verify_success(&self, _input: &VerifyInput, _record: &KeyRecord) -> HookResult {
        Ok(None)
    }
}
