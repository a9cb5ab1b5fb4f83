//! Plugin pipeline
//!
//! Ordered registry of plugins and the hook runner used by the key service.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::key::VerifyField;
use crate::domain::plugin::{
    CapabilityRegistry, Hook, HookResult, Plugin, PluginError, Rejection,
};
use crate::domain::ErrorCode;

/// Plugins in registration order
#[derive(Default, Clone)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; names must be unique
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();

        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(PluginError::already_registered(name));
        }

        info!(plugin_id = %name, position = self.plugins.len(), "Registering plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every plugin's setup in order. Failures are logged and returned,
    /// never raised.
    pub async fn setup_all(&self) -> Vec<PluginError> {
        let mut errors = Vec::new();

        for plugin in &self.plugins {
            match plugin.setup().await {
                Ok(()) => debug!(plugin_id = %plugin.name(), "Plugin setup complete"),
                Err(e) => {
                    error!(
                        plugin_id = %plugin.name(),
                        code = %ErrorCode::PluginSetupFailed,
                        error = %e,
                        "Plugin setup failed"
                    );
                    errors.push(e);
                }
            }
        }

        errors
    }

    /// Run a hook through all plugins, stopping at the first rejection
    pub async fn run(&self, hook: Hook<'_>) -> Option<Rejection> {
        let phase = hook.phase();

        for plugin in &self.plugins {
            match dispatch(plugin.as_ref(), hook).await {
                Ok(Some(decision)) if decision.reject => {
                    let reason = decision
                        .reason
                        .unwrap_or_else(|| "rejected".to_string());

                    debug!(
                        plugin_id = %plugin.name(),
                        phase = %phase,
                        reason = %reason,
                        "Hook rejected operation"
                    );

                    return Some(Rejection {
                        plugin: plugin.name().to_string(),
                        reason,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        plugin_id = %plugin.name(),
                        phase = %phase,
                        error = %e,
                        "Hook failed, continuing"
                    );
                }
            }
        }

        None
    }

    /// Union of the verify fields required by all plugins
    pub fn required_verify_fields(&self) -> Vec<(String, VerifyField)> {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();

        for plugin in &self.plugins {
            for field in plugin.required_verify_fields() {
                if seen.insert(field) {
                    fields.push((plugin.name().to_string(), field));
                }
            }
        }

        fields
    }

    /// Merge all contributed capabilities, later plugins winning on collision
    pub fn capabilities(&self) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();

        for plugin in &self.plugins {
            for capability in plugin.capabilities() {
                if registry.insert(capability) {
                    warn!(
                        plugin_id = %plugin.name(),
                        "Plugin overrides a capability registered earlier"
                    );
                }
            }
        }

        registry
    }
}

impl fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.names())
            .finish()
    }
}

async fn dispatch(plugin: &dyn Plugin, hook: Hook<'_>) -> HookResult {
    match hook {
        Hook::BeforeCreateKey(input) => plugin.before_create_key(input).await,
        Hook::OnKeyCreated(record) => plugin.on_key_created(record).await,
        Hook::BeforeVerify(input) => plugin.before_verify(input).await,
        Hook::OnKeyRecordLoaded { input, record } => {
            plugin.on_key_record_loaded(input, record).await
        }
        Hook::OnVerifySuccess { input, record } => plugin.on_verify_success(input, record).await,
    }
}
