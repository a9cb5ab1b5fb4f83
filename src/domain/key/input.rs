//! Inputs and outcomes of key operations

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{KeyId, KeyRecord, Metadata};

/// Reasons reported on failed verification
///
/// Extensions may report their own reasons; these are the built-in ones.
pub mod reason {
    pub const NOT_FOUND: &str = "not_found";
    pub const REVOKED: &str = "revoked";
    pub const EXPIRED: &str = "expired";
    pub const USAGE_EXCEEDED: &str = "usage_exceeded";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INSUFFICIENT_SCOPE: &str = "insufficient_scope";
}

/// Parameters for issuing a new key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateKeyInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Overrides the configured prefix for this key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_remaining: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CreateKeyInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_uses_remaining(mut self, uses: i64) -> Self {
        self.uses_remaining = Some(uses);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Optional verify fields that extensions can make mandatory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyField {
    Namespace,
    Scopes,
}

impl VerifyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Scopes => "scopes",
        }
    }
}

/// Parameters for verifying a presented key
#[derive(Clone)]
pub struct VerifyInput {
    /// Plaintext key as presented by the caller
    pub key: String,
    /// Rate limit partition, required once rate limiting is installed
    pub namespace: Option<String>,
    /// Scopes the caller needs for this request
    pub scopes: Vec<String>,
    /// Whether the outcome should carry the record's metadata
    pub include_metadata: bool,
}

impl VerifyInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            namespace: None,
            scopes: Vec::new(),
            include_metadata: true,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.include_metadata = false;
        self
    }

    /// Whether an optional field was supplied
    pub fn has_field(&self, field: VerifyField) -> bool {
        match field {
            VerifyField::Namespace => self.namespace.as_deref().is_some_and(|ns| !ns.is_empty()),
            VerifyField::Scopes => !self.scopes.is_empty(),
        }
    }
}

// The plaintext key must never reach logs.
impl fmt::Debug for VerifyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyInput")
            .field("key", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("scopes", &self.scopes)
            .field("include_metadata", &self.include_metadata)
            .finish()
    }
}

/// Result of a verification
///
/// An invalid key is a successful call with `valid == false`; errors are
/// reserved for failures of the system itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl VerifyOutcome {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            key_id: None,
            owner_id: None,
            metadata: None,
        }
    }

    /// Invalid outcome that still identifies the key it was about
    pub fn invalid_for(record: &KeyRecord, reason: impl Into<String>) -> Self {
        Self {
            key_id: Some(record.id().clone()),
            ..Self::invalid(reason)
        }
    }

    pub fn valid(record: &KeyRecord, include_metadata: bool) -> Self {
        Self {
            valid: true,
            reason: None,
            key_id: Some(record.id().clone()),
            owner_id: record.owner_id().map(str::to_string),
            metadata: include_metadata.then(|| record.metadata().clone()),
        }
    }
}
