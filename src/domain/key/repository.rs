//! Key store contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entity::{KeyId, KeyRecord};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Result of spending one use of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseSpend {
    /// One use was spent; this many remain
    Spent(i64),
    /// The key had no uses left; nothing was written
    Exhausted,
    /// The key has no usage limit
    Unlimited,
    Missing,
}

/// Persistence boundary for key records
///
/// Absence is never an error: lookups return `Ok(None)`. Implementations
/// report backend failures as [`DomainError::Storage`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Warm up connections or create schema before first use
    async fn ready(&self) -> Result<(), DomainError> {
        Ok(())
    }

    /// Persist a new record; the hash must not collide with an existing one
    async fn create_key(&self, record: KeyRecord) -> Result<(), DomainError>;

    /// Look up a record by its verification digest
    async fn find_key_by_hash(&self, hash: &str) -> Result<Option<KeyRecord>, DomainError>;

    /// Look up a record by ID
    async fn find_key_by_id(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError>;

    /// Replace an existing record
    ///
    /// A revocation already stored is kept, even when `record` was loaded
    /// before the key was revoked.
    async fn update_key(&self, record: &KeyRecord) -> Result<(), DomainError>;

    /// Atomically spend one of the key's remaining uses
    ///
    /// Writes `uses_remaining` only, so it never races other fields.
    async fn spend_use(&self, id: &KeyId) -> Result<UseSpend, DomainError>;

    /// Mark a record revoked. Revoking twice keeps the first timestamp.
    async fn revoke_key_by_id(
        &self,
        id: &KeyId,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Delete a record, returning whether it existed
    async fn hard_remove_key_by_id(&self, id: &KeyId) -> Result<bool, DomainError>;

    /// IDs of records with `expires_at <= cutoff`, at most `limit` of them
    ///
    /// Optional; stores that cannot scan by expiry keep this default.
    async fn find_expired_ids(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<KeyId>, DomainError> {
        Err(DomainError::sweep_unsupported(
            "key store does not support expiry scans",
        ))
    }
}
