//! Runtime selection of stores from the application config

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::config::{AppConfig, KeyStoreBackend, RateLimitBackend, StorageConfig};
use crate::domain::key::KeyStore;
use crate::domain::rate_limit::RateLimitStore;
use crate::domain::DomainError;

use super::analytics::TracingAnalyticsSink;
use super::database::PostgresConfig;
use super::key::{InMemoryKeyStore, KeyServiceBuilder, KeyServiceConfig, PostgresKeyStore};
use super::rate_limit::{
    InMemoryRateLimitStore, PostgresRateLimitStore, RedisRateLimitConfig, RedisRateLimitMode,
    RedisRateLimitStore,
};

/// Creates stores for the configured backends
///
/// Both Postgres-backed stores share one pool, opened on first use.
#[derive(Debug)]
pub struct StoreFactory {
    storage: StorageConfig,
    pool: Option<PgPool>,
}

impl StoreFactory {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            pool: None,
        }
    }

    pub async fn key_store(&mut self) -> Result<Arc<dyn KeyStore>, DomainError> {
        match self.storage.key_store {
            KeyStoreBackend::Memory => Ok(Arc::new(InMemoryKeyStore::new())),
            KeyStoreBackend::Postgres => {
                let pool = self.pool().await?;
                Ok(Arc::new(PostgresKeyStore::new(pool)))
            }
        }
    }

    pub async fn rate_limit_store(&mut self) -> Result<Arc<dyn RateLimitStore>, DomainError> {
        match self.storage.rate_limit_store {
            RateLimitBackend::Memory => Ok(Arc::new(InMemoryRateLimitStore::new())),
            RateLimitBackend::Postgres => {
                let pool = self.pool().await?;
                Ok(Arc::new(PostgresRateLimitStore::new(pool)))
            }
            RateLimitBackend::Redis => {
                let config = redis_config(&self.storage)?;
                Ok(Arc::new(RedisRateLimitStore::connect(config).await?))
            }
        }
    }

    async fn pool(&mut self) -> Result<PgPool, DomainError> {
        if let Some(pool) = &self.pool {
            return Ok(pool.clone());
        }

        let pool = postgres_config(&self.storage)?.connect().await?;
        info!("Connected to PostgreSQL");
        self.pool = Some(pool.clone());

        Ok(pool)
    }
}

fn postgres_config(storage: &StorageConfig) -> Result<PostgresConfig, DomainError> {
    let url = storage.database_url.as_deref().ok_or_else(|| {
        DomainError::configuration("storage.database_url is required for the postgres backend")
    })?;

    Ok(PostgresConfig::new(url).with_max_connections(storage.max_connections))
}

fn redis_config(storage: &StorageConfig) -> Result<RedisRateLimitConfig, DomainError> {
    let url = storage.redis_url.as_deref().ok_or_else(|| {
        DomainError::configuration("storage.redis_url is required for the redis backend")
    })?;

    let mode = if storage.redis_best_effort {
        RedisRateLimitMode::BestEffort
    } else {
        RedisRateLimitMode::Scripted
    };

    Ok(RedisRateLimitConfig::new(url).with_mode(mode))
}

/// A service builder wired from `config`, ready for plugins to be added
pub async fn key_service_builder(config: &AppConfig) -> Result<KeyServiceBuilder, DomainError> {
    let mut factory = StoreFactory::new(config.storage.clone());
    let builder = builder_with_key_store(config, &mut factory).await?;
    let rate_limit_store = factory.rate_limit_store().await?;

    info!(rate_limit_store = ?config.storage.rate_limit_store, "Rate limit store created");

    Ok(builder.with_rate_limit_store(rate_limit_store))
}

/// Like [`key_service_builder`] but without a rate limit store, for offline
/// jobs that only touch key records
pub async fn key_store_service_builder(
    config: &AppConfig,
) -> Result<KeyServiceBuilder, DomainError> {
    let mut factory = StoreFactory::new(config.storage.clone());
    builder_with_key_store(config, &mut factory).await
}

async fn builder_with_key_store(
    config: &AppConfig,
    factory: &mut StoreFactory,
) -> Result<KeyServiceBuilder, DomainError> {
    let service_config = KeyServiceConfig::from_settings(&config.keys)?;
    let key_store = factory.key_store().await?;

    info!(key_store = ?config.storage.key_store, "Key store created");

    Ok(KeyServiceBuilder::new(key_store)
        .with_config(service_config)
        .with_analytics(Arc::new(TracingAnalyticsSink)))
}
