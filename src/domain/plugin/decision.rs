//! Policy decisions returned by hooks

use serde::{Deserialize, Serialize};

/// Verdict of a single hook
///
/// Hooks that have nothing to say return `None` instead of an allow
/// decision; both let the pipeline continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub reject: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            reject: false,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            reject: true,
            reason: Some(reason.into()),
        }
    }
}

/// A rejection as surfaced to the calling operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the plugin that rejected
    pub plugin: String,
    /// Reason given by the plugin, verbatim
    pub reason: String,
}
