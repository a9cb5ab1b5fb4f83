//! In-memory key store implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::key::{KeyId, KeyRecord, KeyStore, UseSpend};
use crate::domain::DomainError;

/// In-memory implementation of [`KeyStore`]
///
/// Safe for concurrent use within one process. Locks are always taken in
/// the order `keys`, then `hash_index`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyStore {
    keys: Arc<RwLock<HashMap<String, KeyRecord>>>,
    hash_index: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, revoked ones included
    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn create_key(&self, record: KeyRecord) -> Result<(), DomainError> {
        let mut keys = self.keys.write().await;
        let mut hash_index = self.hash_index.write().await;

        let id = record.id().as_str().to_string();

        if keys.contains_key(&id) {
            return Err(DomainError::storage_permanent(format!(
                "Key with ID '{}' already exists",
                id
            )));
        }

        if hash_index.contains_key(record.hash()) {
            return Err(DomainError::storage_permanent(
                "Key with the same hash already exists",
            ));
        }

        hash_index.insert(record.hash().to_string(), id.clone());
        keys.insert(id, record);

        Ok(())
    }

    async fn find_key_by_hash(&self, hash: &str) -> Result<Option<KeyRecord>, DomainError> {
        let keys = self.keys.read().await;
        let hash_index = self.hash_index.read().await;

        Ok(hash_index.get(hash).and_then(|id| keys.get(id)).cloned())
    }

    async fn find_key_by_id(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
        let keys = self.keys.read().await;
        Ok(keys.get(id.as_str()).cloned())
    }

    async fn update_key(&self, record: &KeyRecord) -> Result<(), DomainError> {
        let mut keys = self.keys.write().await;
        let mut hash_index = self.hash_index.write().await;

        let id = record.id().as_str();

        let Some(existing) = keys.get_mut(id) else {
            return Err(DomainError::storage_permanent(format!(
                "Key '{}' not found",
                id
            )));
        };

        if existing.hash() != record.hash() {
            hash_index.remove(existing.hash());
            hash_index.insert(record.hash().to_string(), id.to_string());
        }

        let mut next = record.clone();
        if let Some(revoked_at) = existing.revoked_at() {
            next = next.with_revoked_at(Some(revoked_at));
        }

        *existing = next;
        Ok(())
    }

    async fn spend_use(&self, id: &KeyId) -> Result<UseSpend, DomainError> {
        let mut keys = self.keys.write().await;

        let Some(record) = keys.get_mut(id.as_str()) else {
            return Ok(UseSpend::Missing);
        };

        match record.uses_remaining() {
            None => Ok(UseSpend::Unlimited),
            Some(remaining) if remaining <= 0 => Ok(UseSpend::Exhausted),
            Some(remaining) => {
                record.set_uses_remaining(Some(remaining - 1));
                Ok(UseSpend::Spent(remaining - 1))
            }
        }
    }

    async fn revoke_key_by_id(
        &self,
        id: &KeyId,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut keys = self.keys.write().await;

        if let Some(record) = keys.get_mut(id.as_str()) {
            record.revoke(revoked_at);
        }

        Ok(())
    }

    async fn hard_remove_key_by_id(&self, id: &KeyId) -> Result<bool, DomainError> {
        let mut keys = self.keys.write().await;
        let mut hash_index = self.hash_index.write().await;

        if let Some(record) = keys.remove(id.as_str()) {
            hash_index.remove(record.hash());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn find_expired_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<KeyId>, DomainError> {
        let keys = self.keys.read().await;

        let mut expired: Vec<&KeyRecord> = keys
            .values()
            .filter(|record| record.is_expired_at(cutoff))
            .collect();

        // Oldest expiry first so repeated sweeps make steady progress
        expired.sort_by_key(|record| record.expires_at());

        Ok(expired
            .into_iter()
            .take(limit)
            .map(|record| record.id().clone())
            .collect())
    }
}
