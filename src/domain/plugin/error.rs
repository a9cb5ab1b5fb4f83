//! Plugin error types

use thiserror::Error;

use crate::domain::DomainError;

/// Plugin-specific errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin already registered: {plugin_id}")]
    AlreadyRegistered { plugin_id: String },

    #[error("Plugin setup failed for '{plugin_id}': {message}")]
    SetupFailed { plugin_id: String, message: String },

    #[error("Hook failed in '{plugin_id}': {message}")]
    HookFailed { plugin_id: String, message: String },

    #[error("Configuration error for '{plugin_id}': {message}")]
    Configuration { plugin_id: String, message: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PluginError {
    pub fn already_registered(plugin_id: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn setup_failed(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SetupFailed {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn hook_failed(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookFailed {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    pub fn configuration(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }
}
