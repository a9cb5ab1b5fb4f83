//! Scope plugin

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::key::{reason, KeyRecord, VerifyInput};
use crate::domain::plugin::{HookResult, Plugin, PolicyDecision};

pub const SCOPES_PLUGIN: &str = "scopes";

/// Metadata entry listing the scopes a key grants
pub const SCOPES_METADATA_KEY: &str = "scopes";

/// Rejects `insufficient_scope` unless the key grants every requested scope
///
/// Granted scopes are the string entries of the `scopes` metadata array. A
/// verification that asks for no scopes always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopePlugin;

impl ScopePlugin {
    pub fn new() -> Self {
        Self
    }
}

fn granted_scopes(record: &KeyRecord) -> HashSet<&str> {
    record
        .metadata()
        .get(SCOPES_METADATA_KEY)
        .and_then(|value| value.as_array())
        .map(|scopes| scopes.iter().filter_map(|s| s.as_str()).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Plugin for ScopePlugin {
    fn name(&self) -> &str {
        SCOPES_PLUGIN
    }

    async fn on_key_record_loaded(&self, input: &VerifyInput, record: &KeyRecord) -> HookResult {
        if input.scopes.is_empty() {
            return Ok(None);
        }

        let granted = granted_scopes(record);
        let missing: Vec<&str> = input
            .scopes
            .iter()
            .map(String::as_str)
            .filter(|scope| !granted.contains(scope))
            .collect();

        if missing.is_empty() {
            return Ok(None);
        }

        debug!(key_id = %record.id(), missing = ?missing, "Key lacks requested scopes");
        Ok(Some(PolicyDecision::reject(reason::INSUFFICIENT_SCOPE)))
    }
}
