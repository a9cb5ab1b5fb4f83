//! Key record entity and related types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation::{validate_key_id, KeyValidationError};

/// Opaque per-key metadata
pub type Metadata = HashMap<String, serde_json::Value>;

/// Key identifier, stable and visible to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Create a new KeyId after validation
    pub fn new(id: impl Into<String>) -> Result<Self, KeyValidationError> {
        let id = id.into();
        validate_key_id(&id)?;
        Ok(Self(id))
    }

    /// Wrap a freshly generated UUID, which is always a valid identifier
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyId {
    type Error = KeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a record as observed at a point in time
///
/// Only revocation is persisted; expiry is derived from `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Revoked,
    Expired,
}

/// Persisted key record
///
/// Holds only the one-way hash of the key; the plaintext is handed to the
/// caller once at creation and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    id: KeyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<String>,
    /// Cosmetic prefix shown in listings (e.g. "sk_live_")
    prefix: String,
    /// Verification digest; unique across all records
    hash: String,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    /// None = unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    uses_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Metadata,
}

impl KeyRecord {
    /// Create a new active key record
    pub fn new(
        id: KeyId,
        prefix: impl Into<String>,
        hash: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id: None,
            prefix: prefix.into(),
            hash: hash.into(),
            created_at,
            expires_at: None,
            uses_remaining: None,
            revoked_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_uses_remaining(mut self, uses_remaining: Option<i64>) -> Self {
        self.uses_remaining = uses_remaining;
        self
    }

    pub fn with_revoked_at(mut self, revoked_at: Option<DateTime<Utc>>) -> Self {
        self.revoked_at = revoked_at;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    // Getters

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn uses_remaining(&self) -> Option<i64> {
        self.uses_remaining
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    // Status checks

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// A key is expired once `now` reaches `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the built-in usage gate rejects this key
    pub fn is_usage_exhausted(&self) -> bool {
        self.uses_remaining.is_some_and(|uses| uses <= 0)
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> KeyStatus {
        if self.is_revoked() {
            KeyStatus::Revoked
        } else if self.is_expired_at(now) {
            KeyStatus::Expired
        } else {
            KeyStatus::Active
        }
    }

    // Mutators

    /// Mark the key revoked; an earlier revocation time is kept
    pub fn revoke(&mut self, at: DateTime<Utc>) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(at);
        }
    }

    pub fn set_expires_at(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = expires_at;
    }

    pub fn set_uses_remaining(&mut self, uses_remaining: Option<i64>) {
        self.uses_remaining = uses_remaining;
    }

    /// Merge entries into the metadata, overwriting existing keys
    pub fn merge_metadata(&mut self, patch: Metadata) {
        self.metadata.extend(patch);
    }
}
