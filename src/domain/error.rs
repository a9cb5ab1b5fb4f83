use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error codes surfaced by every fallible operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    KeystoreReadFailed,
    KeystoreWriteFailed,
    KeystoreRevokeFailed,
    KeyGenerationFailed,
    PluginBlocked,
    PluginSetupFailed,
    AnalyticsTrackFailed,
    SweepUnsupported,
    RateLimitStoreFailed,
    UnsupportedOperation,
    ValidationFailed,
    StorageFailed,
    ConfigurationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeystoreReadFailed => "KEYSTORE_READ_FAILED",
            Self::KeystoreWriteFailed => "KEYSTORE_WRITE_FAILED",
            Self::KeystoreRevokeFailed => "KEYSTORE_REVOKE_FAILED",
            Self::KeyGenerationFailed => "KEY_GENERATION_FAILED",
            Self::PluginBlocked => "PLUGIN_BLOCKED",
            Self::PluginSetupFailed => "PLUGIN_SETUP_FAILED",
            Self::AnalyticsTrackFailed => "ANALYTICS_TRACK_FAILED",
            Self::SweepUnsupported => "SWEEP_UNSUPPORTED",
            Self::RateLimitStoreFailed => "RATE_LIMIT_STORE_FAILED",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::ConfigurationFailed => "CONFIGURATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core domain errors
///
/// Adapters report [`DomainError::Storage`]; the key service reclassifies
/// those into the keystore variants depending on which operation failed.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Key store read failed: {message}")]
    KeystoreRead {
        message: String,
        #[source]
        cause: Option<Box<DomainError>>,
    },

    #[error("Key store write failed: {message}")]
    KeystoreWrite {
        message: String,
        #[source]
        cause: Option<Box<DomainError>>,
    },

    #[error("Key store revoke failed: {message}")]
    KeystoreRevoke {
        message: String,
        #[source]
        cause: Option<Box<DomainError>>,
    },

    #[error("Key generation failed: {message}")]
    KeyGeneration { message: String },

    #[error("Blocked by plugin '{plugin}': {reason}")]
    PluginBlocked { plugin: String, reason: String },

    #[error("Plugin setup failed for '{plugin}': {message}")]
    PluginSetup { plugin: String, message: String },

    #[error("Analytics tracking failed for '{event}': {message}")]
    AnalyticsTrack { event: String, message: String },

    #[error("Sweep unsupported: {message}")]
    SweepUnsupported { message: String },

    #[error("Rate limit store error: {message}")]
    RateLimitStore { message: String, retryable: bool },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String, retryable: bool },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Serializable tagged form of an error, suitable for wire responses
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DomainError {
    pub fn keystore_read(message: impl Into<String>, cause: DomainError) -> Self {
        Self::KeystoreRead {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn keystore_write(message: impl Into<String>, cause: DomainError) -> Self {
        Self::KeystoreWrite {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn keystore_revoke(message: impl Into<String>, cause: DomainError) -> Self {
        Self::KeystoreRevoke {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    pub fn plugin_blocked(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PluginBlocked {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    pub fn plugin_setup(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginSetup {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn analytics_track(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AnalyticsTrack {
            event: event.into(),
            message: message.into(),
        }
    }

    pub fn sweep_unsupported(message: impl Into<String>) -> Self {
        Self::SweepUnsupported {
            message: message.into(),
        }
    }

    pub fn rate_limit_store(message: impl Into<String>) -> Self {
        Self::RateLimitStore {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: true,
        }
    }

    /// Storage failure that repeating the call will not fix (e.g. a conflict)
    pub fn storage_permanent(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::KeystoreRead { .. } => ErrorCode::KeystoreReadFailed,
            Self::KeystoreWrite { .. } => ErrorCode::KeystoreWriteFailed,
            Self::KeystoreRevoke { .. } => ErrorCode::KeystoreRevokeFailed,
            Self::KeyGeneration { .. } => ErrorCode::KeyGenerationFailed,
            Self::PluginBlocked { .. } => ErrorCode::PluginBlocked,
            Self::PluginSetup { .. } => ErrorCode::PluginSetupFailed,
            Self::AnalyticsTrack { .. } => ErrorCode::AnalyticsTrackFailed,
            Self::SweepUnsupported { .. } => ErrorCode::SweepUnsupported,
            Self::RateLimitStore { .. } => ErrorCode::RateLimitStoreFailed,
            Self::Unsupported { .. } => ErrorCode::UnsupportedOperation,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::Storage { .. } => ErrorCode::StorageFailed,
            Self::Configuration { .. } => ErrorCode::ConfigurationFailed,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::KeystoreRead { cause, .. }
            | Self::KeystoreWrite { cause, .. }
            | Self::KeystoreRevoke { cause, .. } => {
                cause.as_ref().map(|c| c.is_retryable()).unwrap_or(false)
            }
            Self::RateLimitStore { retryable, .. } | Self::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let mut meta = serde_json::Map::new();

        match self {
            Self::PluginBlocked { plugin, reason } => {
                meta.insert("plugin".into(), plugin.clone().into());
                meta.insert("reason".into(), reason.clone().into());
            }
            Self::PluginSetup { plugin, .. } => {
                meta.insert("plugin".into(), plugin.clone().into());
            }
            Self::AnalyticsTrack { event, .. } => {
                meta.insert("event".into(), event.clone().into());
            }
            _ => {}
        }

        let cause = match self {
            Self::KeystoreRead { cause, .. }
            | Self::KeystoreWrite { cause, .. }
            | Self::KeystoreRevoke { cause, .. } => cause.as_ref().map(|c| c.to_string()),
            _ => None,
        };

        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            cause,
            meta,
        }
    }
}
