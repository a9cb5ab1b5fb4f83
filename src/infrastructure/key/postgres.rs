//! PostgreSQL key store implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::domain::key::{KeyId, KeyRecord, KeyStore, Metadata, UseSpend};
use crate::domain::DomainError;
use crate::infrastructure::database::map_sqlx_error;

const DEFAULT_TABLE: &str = "keyward_keys";

const COLUMNS: &str = "id, owner_id, prefix, hash, created_at, expires_at, \
                       uses_remaining, revoked_at, metadata";

/// PostgreSQL implementation of [`KeyStore`]
#[derive(Debug, Clone)]
pub struct PostgresKeyStore {
    pool: PgPool,
    table: String,
}

impl PostgresKeyStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Use a different table name (must be a trusted identifier)
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Full-row update that never clears a stored revocation
    fn update_sql(&self) -> String {
        format!(
            r#"
            UPDATE {}
            SET owner_id = $2, prefix = $3, hash = $4, expires_at = $5,
                uses_remaining = $6, revoked_at = COALESCE(revoked_at, $7), metadata = $8
            WHERE id = $1
            "#,
            self.table
        )
    }

    fn spend_use_sql(&self) -> String {
        format!(
            r#"
            UPDATE {}
            SET uses_remaining = uses_remaining - 1
            WHERE id = $1 AND uses_remaining > 0
            RETURNING uses_remaining
            "#,
            self.table
        )
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR(128) PRIMARY KEY,
                owner_id TEXT,
                prefix VARCHAR(32) NOT NULL,
                hash TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                uses_remaining BIGINT,
                revoked_at TIMESTAMPTZ,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
            )
            "#,
            table = self.table
        )
    }

    fn create_index_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at) \
             WHERE expires_at IS NOT NULL",
            table = self.table
        )
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn ready(&self) -> Result<(), DomainError> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to create key table", e))?;

        sqlx::query(&self.create_index_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to create expiry index", e))?;

        info!(table = %self.table, "PostgreSQL key store ready");
        Ok(())
    }

    async fn create_key(&self, record: KeyRecord) -> Result<(), DomainError> {
        let query = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table, COLUMNS
        );

        sqlx::query(&query)
            .bind(record.id().as_str())
            .bind(record.owner_id())
            .bind(record.prefix())
            .bind(record.hash())
            .bind(record.created_at())
            .bind(record.expires_at())
            .bind(record.uses_remaining())
            .bind(record.revoked_at())
            .bind(Json(record.metadata()))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to insert key", e))?;

        Ok(())
    }

    async fn find_key_by_hash(&self, hash: &str) -> Result<Option<KeyRecord>, DomainError> {
        let query = format!("SELECT {} FROM {} WHERE hash = $1", COLUMNS, self.table);

        let row = sqlx::query(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to load key by hash", e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_key_by_id(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, self.table);

        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to load key by id", e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn update_key(&self, record: &KeyRecord) -> Result<(), DomainError> {
        let query = self.update_sql();

        let result = sqlx::query(&query)
            .bind(record.id().as_str())
            .bind(record.owner_id())
            .bind(record.prefix())
            .bind(record.hash())
            .bind(record.expires_at())
            .bind(record.uses_remaining())
            .bind(record.revoked_at())
            .bind(Json(record.metadata()))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to update key", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::storage_permanent(format!(
                "Key '{}' not found",
                record.id()
            )));
        }

        Ok(())
    }

    async fn spend_use(&self, id: &KeyId) -> Result<UseSpend, DomainError> {
        let query = self.spend_use_sql();

        let spent: Option<i64> = sqlx::query_scalar(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to spend key use", e))?;

        if let Some(remaining) = spent {
            return Ok(UseSpend::Spent(remaining));
        }

        let query = format!("SELECT uses_remaining FROM {} WHERE id = $1", self.table);
        let current: Option<Option<i64>> = sqlx::query_scalar(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to read key uses", e))?;

        Ok(match current {
            None => UseSpend::Missing,
            Some(None) => UseSpend::Unlimited,
            Some(Some(_)) => UseSpend::Exhausted,
        })
    }

    async fn revoke_key_by_id(
        &self,
        id: &KeyId,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let query = format!(
            "UPDATE {} SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1",
            self.table
        );

        sqlx::query(&query)
            .bind(id.as_str())
            .bind(revoked_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to revoke key", e))?;

        Ok(())
    }

    async fn hard_remove_key_by_id(&self, id: &KeyId) -> Result<bool, DomainError> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.table);

        let result = sqlx::query(&query)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to delete key", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<KeyId>, DomainError> {
        let query = format!(
            "SELECT id FROM {} WHERE expires_at IS NOT NULL AND expires_at <= $1 \
             ORDER BY expires_at LIMIT $2",
            self.table
        );

        let rows = sqlx::query(&query)
            .bind(cutoff)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to list expired keys", e))?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                KeyId::new(id)
                    .map_err(|e| DomainError::storage(format!("Invalid key ID in database: {}", e)))
            })
            .collect()
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<KeyRecord, DomainError> {
    let decode = |e: sqlx::Error| DomainError::storage(format!("Failed to decode key row: {}", e));

    let id: String = row.try_get("id").map_err(decode)?;
    let owner_id: Option<String> = row.try_get("owner_id").map_err(decode)?;
    let prefix: String = row.try_get("prefix").map_err(decode)?;
    let hash: String = row.try_get("hash").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let expires_at: Option<DateTime<Utc>> = row.try_get("expires_at").map_err(decode)?;
    let uses_remaining: Option<i64> = row.try_get("uses_remaining").map_err(decode)?;
    let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at").map_err(decode)?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata").map_err(decode)?;

    let id = KeyId::new(id)
        .map_err(|e| DomainError::storage(format!("Invalid key ID in database: {}", e)))?;

    let mut record = KeyRecord::new(id, prefix, hash, created_at)
        .with_expires_at(expires_at)
        .with_uses_remaining(uses_remaining)
        .with_revoked_at(revoked_at)
        .with_metadata(metadata);

    if let Some(owner_id) = owner_id {
        record = record.with_owner_id(owner_id);
    }

    Ok(record)
}
