//! Key service configuration
//!
//! Built once and frozen behind an `Arc` when the service is constructed.

use std::fmt;
use std::sync::Arc;

use crate::config::KeysConfig;
use crate::domain::key::validate_prefix;
use crate::domain::{DomainError, RandomSource};

use super::generator::{KeyGenerator, KeyKind};
use super::hasher::KeyHasher;
use super::random::OsRandom;

/// Entropy and hashing used for key material
///
/// Passed explicitly to the service; tests swap in a seeded source here.
#[derive(Clone)]
pub struct CryptoProvider {
    random: Arc<dyn RandomSource>,
    hasher: KeyHasher,
}

impl CryptoProvider {
    pub fn new(random: Arc<dyn RandomSource>, hasher: KeyHasher) -> Self {
        Self { random, hasher }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_hasher(mut self, hasher: KeyHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    pub fn hasher(&self) -> &KeyHasher {
        &self.hasher
    }
}

impl Default for CryptoProvider {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom), KeyHasher::default())
    }
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("random", &self.random)
            .field("hasher", &self.hasher)
            .finish()
    }
}

/// Configuration snapshot of the key service
#[derive(Debug, Clone, Default)]
pub struct KeyServiceConfig {
    pub generator: KeyGenerator,
    pub crypto: CryptoProvider,
    /// Hard-remove expired records when verification finds them
    pub auto_delete_expired: bool,
}

impl KeyServiceConfig {
    pub fn new(generator: KeyGenerator) -> Self {
        Self {
            generator,
            ..Default::default()
        }
    }

    pub fn with_crypto(mut self, crypto: CryptoProvider) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_auto_delete_expired(mut self, enabled: bool) -> Self {
        self.auto_delete_expired = enabled;
        self
    }

    /// Build from the `keys` section of the application config
    pub fn from_settings(settings: &KeysConfig) -> Result<Self, DomainError> {
        validate_prefix(&settings.prefix)
            .map_err(|e| DomainError::configuration(e.to_string()))?;

        let kind = KeyKind::from_name(&settings.kind, settings.length)?;
        let hasher = KeyHasher::from_secret(settings.hash_secret.as_deref());

        Ok(Self {
            generator: KeyGenerator::new(&settings.prefix, kind),
            crypto: CryptoProvider::default().with_hasher(hasher),
            auto_delete_expired: settings.auto_delete_expired,
        })
    }
}
