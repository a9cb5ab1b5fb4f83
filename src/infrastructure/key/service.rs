//! Key service
//!
//! Issues, verifies and manages keys on top of a [`KeyStore`], running the
//! plugin pipeline at each lifecycle phase.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::analytics::event;
use crate::domain::key::{
    reason, validate_prefix, CreateKeyInput, KeyId, KeyRecord, KeyStore, Metadata, VerifyInput,
    VerifyOutcome,
};
use crate::domain::plugin::{CapabilityRegistry, Hook, Plugin};
use crate::domain::{
    AnalyticsSink, Clock, DomainError, ErrorCode, RateLimitStore, SystemClock, VerifyField,
};
use crate::infrastructure::analytics::NoopAnalyticsSink;
use crate::infrastructure::plugin::PluginPipeline;

use super::config::KeyServiceConfig;

/// Default number of IDs handled per sweep
pub const DEFAULT_SWEEP_BATCH: usize = 100;

/// Upper bound on a single sweep batch
pub const MAX_SWEEP_BATCH: usize = 1000;

/// A freshly issued key. `plaintext` is not recoverable afterwards.
#[derive(Clone)]
pub struct CreatedKey {
    pub id: KeyId,
    pub plaintext: String,
    pub record: KeyRecord,
}

impl fmt::Debug for CreatedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedKey")
            .field("id", &self.id)
            .field("plaintext", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Parameters of an expiry sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOptions {
    /// IDs handled in this call, clamped to `1..=1000`
    pub batch_size: usize,
    /// Remove records expired at or before this instant; defaults to now
    pub older_than: Option<DateTime<Utc>>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SWEEP_BATCH,
            older_than: None,
        }
    }
}

impl SweepOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_older_than(mut self, older_than: DateTime<Utc>) -> Self {
        self.older_than = Some(older_than);
        self
    }
}

/// Counts reported by a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    /// IDs returned by the store for this batch
    pub processed: usize,
    pub removed: usize,
    pub failed: usize,
    /// The batch was full, so more expired records may remain
    pub remaining_hint: bool,
}

/// Credential lifecycle engine
pub struct KeyService {
    store: Arc<dyn KeyStore>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    analytics: Arc<dyn AnalyticsSink>,
    plugins: PluginPipeline,
    capabilities: CapabilityRegistry,
    required_fields: Vec<(String, VerifyField)>,
    clock: Arc<dyn Clock>,
    config: Arc<KeyServiceConfig>,
}

impl fmt::Debug for KeyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyService")
            .field("plugins", &self.plugins)
            .field("capabilities", &self.capabilities)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyService {
    pub fn builder(store: Arc<dyn KeyStore>) -> KeyServiceBuilder {
        KeyServiceBuilder::new(store)
    }

    pub fn config(&self) -> &KeyServiceConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginPipeline {
        &self.plugins
    }

    /// Rate limit store the service was built with, if any
    pub fn rate_limit_store(&self) -> Option<&Arc<dyn RateLimitStore>> {
        self.rate_limit_store.as_ref()
    }

    /// Look up a capability contributed by a plugin
    pub fn capability<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.capabilities.get::<T>(name)
    }

    /// Issue a new key
    pub async fn create_key(&self, input: CreateKeyInput) -> Result<CreatedKey, DomainError> {
        if let Some(prefix) = &input.prefix {
            validate_prefix(prefix).map_err(|e| DomainError::validation(e.to_string()))?;
        }

        if let Some(rejection) = self.plugins.run(Hook::BeforeCreateKey(&input)).await {
            return Err(DomainError::plugin_blocked(
                rejection.plugin,
                rejection.reason,
            ));
        }

        let crypto = &self.config.crypto;
        let generator = &self.config.generator;
        let prefix = input
            .prefix
            .clone()
            .unwrap_or_else(|| generator.prefix().to_string());

        let plaintext = generator.generate_with_prefix(crypto.random(), &prefix)?;
        let hash = crypto.hasher().hash(&plaintext);
        let id = self.next_id()?;

        let CreateKeyInput {
            owner_id,
            expires_at,
            uses_remaining,
            metadata,
            ..
        } = input;

        let mut record = KeyRecord::new(id.clone(), prefix, hash, self.clock.now())
            .with_expires_at(expires_at)
            .with_uses_remaining(uses_remaining)
            .with_metadata(metadata);

        if let Some(owner_id) = owner_id {
            record = record.with_owner_id(owner_id);
        }

        self.store
            .create_key(record.clone())
            .await
            .map_err(|e| DomainError::keystore_write("Failed to persist key", e))?;

        self.track(
            event::KEY_CREATED,
            json!({ "key_id": id, "owner_id": record.owner_id() }),
        );

        if let Some(rejection) = self.plugins.run(Hook::OnKeyCreated(&record)).await {
            // Roll back so a rejected key never stays usable
            if let Err(e) = self.store.hard_remove_key_by_id(&id).await {
                warn!(key_id = %id, error = %e, "Failed to remove key rejected after creation");
            }

            return Err(DomainError::plugin_blocked(
                rejection.plugin,
                rejection.reason,
            ));
        }

        info!(key_id = %id, owner_id = ?record.owner_id(), "Created key");

        Ok(CreatedKey {
            id,
            plaintext,
            record,
        })
    }

    /// Verify a presented key
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// required fields, `before_verify`, lookup, revocation,
    /// `on_key_record_loaded`, expiry, usage, `on_verify_success`.
    pub async fn verify_key(&self, input: VerifyInput) -> Result<VerifyOutcome, DomainError> {
        for (plugin, field) in &self.required_fields {
            if !input.has_field(*field) {
                return Err(DomainError::validation(format!(
                    "'{}' is required by plugin '{}'",
                    field.as_str(),
                    plugin
                )));
            }
        }

        if let Some(rejection) = self.plugins.run(Hook::BeforeVerify(&input)).await {
            return Ok(VerifyOutcome::invalid(rejection.reason));
        }

        let hash = self.config.crypto.hasher().hash(&input.key);

        let Some(record) = self
            .store
            .find_key_by_hash(&hash)
            .await
            .map_err(|e| DomainError::keystore_read("Failed to load key by hash", e))?
        else {
            debug!("Verification failed: key not found");
            return Ok(VerifyOutcome::invalid(reason::NOT_FOUND));
        };

        if record.is_revoked() {
            debug!(key_id = %record.id(), "Verification failed: key revoked");
            return Ok(VerifyOutcome::invalid_for(&record, reason::REVOKED));
        }

        let hook = Hook::OnKeyRecordLoaded {
            input: &input,
            record: &record,
        };
        if let Some(rejection) = self.plugins.run(hook).await {
            return Ok(VerifyOutcome::invalid_for(&record, rejection.reason));
        }

        if record.is_expired_at(self.clock.now()) {
            debug!(key_id = %record.id(), "Verification failed: key expired");

            if self.config.auto_delete_expired {
                match self.store.hard_remove_key_by_id(record.id()).await {
                    Ok(_) => self.track(event::KEY_REMOVED, json!({ "key_id": record.id() })),
                    Err(e) => {
                        warn!(key_id = %record.id(), error = %e, "Failed to auto-delete expired key")
                    }
                }
            }

            return Ok(VerifyOutcome::invalid_for(&record, reason::EXPIRED));
        }

        if record.is_usage_exhausted() {
            debug!(key_id = %record.id(), "Verification failed: usage exhausted");
            return Ok(VerifyOutcome::invalid_for(&record, reason::USAGE_EXCEEDED));
        }

        self.track(
            event::KEY_VERIFIED,
            json!({
                "key_id": record.id(),
                "owner_id": record.owner_id(),
                "namespace": input.namespace,
            }),
        );

        let hook = Hook::OnVerifySuccess {
            input: &input,
            record: &record,
        };
        if let Some(rejection) = self.plugins.run(hook).await {
            return Ok(VerifyOutcome::invalid_for(&record, rejection.reason));
        }

        Ok(VerifyOutcome::valid(&record, input.include_metadata))
    }

    /// Revoke a key. Revoking twice keeps the first revocation time.
    pub async fn revoke_key(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(None);
        };

        if record.is_revoked() {
            return Ok(Some(record));
        }

        let now = self.clock.now();

        self.store
            .revoke_key_by_id(id, now)
            .await
            .map_err(|e| DomainError::keystore_revoke("Failed to revoke key", e))?;

        record.revoke(now);

        info!(key_id = %id, "Revoked key");
        self.track(event::KEY_REVOKED, json!({ "key_id": id }));

        Ok(Some(record))
    }

    /// Delete a key permanently
    pub async fn hard_remove_key(&self, id: &KeyId) -> Result<bool, DomainError> {
        let removed = self
            .store
            .hard_remove_key_by_id(id)
            .await
            .map_err(|e| DomainError::keystore_write("Failed to remove key", e))?;

        if removed {
            info!(key_id = %id, "Removed key");
            self.track(event::KEY_REMOVED, json!({ "key_id": id }));
        }

        Ok(removed)
    }

    /// Push the expiry out by `delta`, counting from now if the key never expired
    pub async fn extend_key_expiry(
        &self,
        id: &KeyId,
        delta: Duration,
    ) -> Result<Option<KeyRecord>, DomainError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(None);
        };

        let base = record.expires_at().unwrap_or_else(|| self.clock.now());
        let expires_at = base.checked_add_signed(delta).ok_or_else(|| {
            DomainError::validation("expiry extension is out of the representable range")
        })?;
        record.set_expires_at(Some(expires_at));

        self.store
            .update_key(&record)
            .await
            .map_err(|e| DomainError::keystore_write("Failed to update key expiry", e))?;

        info!(key_id = %id, expires_at = ?record.expires_at(), "Extended key expiry");
        Ok(Some(record))
    }

    pub async fn get_key(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
        self.load(id).await
    }

    /// Merge entries into a key's metadata
    pub async fn update_metadata(
        &self,
        id: &KeyId,
        patch: Metadata,
    ) -> Result<Option<KeyRecord>, DomainError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(None);
        };

        record.merge_metadata(patch);

        self.store
            .update_key(&record)
            .await
            .map_err(|e| DomainError::keystore_write("Failed to update key metadata", e))?;

        debug!(key_id = %id, "Updated key metadata");
        Ok(Some(record))
    }

    /// Remove one batch of expired keys
    ///
    /// Per-key failures are counted, not raised. Fails with
    /// `SWEEP_UNSUPPORTED` when the store cannot scan by expiry.
    pub async fn sweep_expired(&self, options: SweepOptions) -> Result<SweepResult, DomainError> {
        let batch_size = options.batch_size.clamp(1, MAX_SWEEP_BATCH);
        let cutoff = options.older_than.unwrap_or_else(|| self.clock.now());

        let ids = self
            .store
            .find_expired_ids(cutoff, batch_size)
            .await
            .map_err(|e| match e.code() {
                ErrorCode::SweepUnsupported => e,
                _ => DomainError::keystore_read("Failed to list expired keys", e),
            })?;

        let mut result = SweepResult {
            processed: ids.len(),
            remaining_hint: ids.len() == batch_size,
            ..SweepResult::default()
        };

        for id in &ids {
            match self.store.hard_remove_key_by_id(id).await {
                Ok(true) => {
                    result.removed += 1;
                    self.track(event::KEY_REMOVED, json!({ "key_id": id, "sweep": true }));
                }
                Ok(false) => {}
                Err(e) => {
                    result.failed += 1;
                    warn!(key_id = %id, error = %e, "Failed to remove expired key during sweep");
                }
            }
        }

        info!(
            processed = result.processed,
            removed = result.removed,
            failed = result.failed,
            remaining_hint = result.remaining_hint,
            "Expiry sweep complete"
        );

        Ok(result)
    }

    async fn load(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
        self.store
            .find_key_by_id(id)
            .await
            .map_err(|e| DomainError::keystore_read("Failed to load key by id", e))
    }

    fn next_id(&self) -> Result<KeyId, DomainError> {
        let mut bytes = [0u8; 16];
        self.config.crypto.random().fill_bytes(&mut bytes)?;
        Ok(KeyId::from_uuid(
            uuid::Builder::from_random_bytes(bytes).into_uuid(),
        ))
    }

    fn track(&self, event: &'static str, payload: serde_json::Value) {
        let sink = self.analytics.clone();

        tokio::spawn(async move {
            if let Err(e) = sink.track(event, payload).await {
                warn!(
                    event = %event,
                    code = %ErrorCode::AnalyticsTrackFailed,
                    error = %e,
                    "Analytics tracking failed"
                );
            }
        });
    }
}

/// Assembles a [`KeyService`]
pub struct KeyServiceBuilder {
    store: Arc<dyn KeyStore>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    analytics: Arc<dyn AnalyticsSink>,
    plugins: Vec<Arc<dyn Plugin>>,
    clock: Arc<dyn Clock>,
    config: KeyServiceConfig,
}

impl KeyServiceBuilder {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            rate_limit_store: None,
            analytics: Arc::new(NoopAnalyticsSink),
            plugins: Vec::new(),
            clock: Arc::new(SystemClock),
            config: KeyServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: KeyServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Readied alongside the key store; plugins hold their own handle
    pub fn with_rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = Some(store);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ready every adapter, register and set up plugins
    ///
    /// Adapter failures abort the build; plugin setup failures are only logged.
    pub async fn build(self) -> Result<KeyService, DomainError> {
        self.store.ready().await?;

        if let Some(rate_limit_store) = &self.rate_limit_store {
            rate_limit_store.ready().await?;
            info!(atomicity = %rate_limit_store.atomicity(), "Rate limit store ready");
        }

        self.analytics.ready().await?;

        let mut pipeline = PluginPipeline::new();
        for plugin in self.plugins {
            pipeline
                .register(plugin)
                .map_err(|e| DomainError::configuration(e.to_string()))?;
        }

        pipeline.setup_all().await;

        let capabilities = pipeline.capabilities();
        let required_fields = pipeline.required_verify_fields();

        info!(
            plugins = ?pipeline.names(),
            capabilities = ?capabilities.names(),
            "Key service ready"
        );

        Ok(KeyService {
            store: self.store,
            rate_limit_store: self.rate_limit_store,
            analytics: self.analytics,
            plugins: pipeline,
            capabilities,
            required_fields,
            clock: self.clock,
            config: Arc::new(self.config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::domain::key::{MockKeyStore, UseSpend};
    use crate::domain::plugin::{Capability, HookResult, PluginError, PolicyDecision};
    use crate::domain::ManualClock;
    use crate::infrastructure::key::{
        CryptoProvider, InMemoryKeyStore, KeyGenerator, KeyHasher, KeyKind, SeededRandom,
    };
    use crate::infrastructure::plugin::builtin::UsageLimitPlugin;

    struct Fixture {
        store: Arc<InMemoryKeyStore>,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryKeyStore::new()),
                clock: ManualClock::starting_now(),
            }
        }

        fn config(&self) -> KeyServiceConfig {
            KeyServiceConfig::new(KeyGenerator::new("sk_test_", KeyKind::UrlSafe(32))).with_crypto(
                CryptoProvider::default()
                    .with_random(Arc::new(SeededRandom::new(7)))
                    .with_hasher(KeyHasher::from_secret(Some("pepper"))),
            )
        }

        fn builder(&self) -> KeyServiceBuilder {
            KeyService::builder(self.store.clone())
                .with_clock(Arc::new(self.clock.clone()))
                .with_config(self.config())
        }

        async fn service(&self) -> KeyService {
            self.builder().build().await.unwrap()
        }
    }

    /// Forwards every tracked event to a channel
    struct RecordingSink {
        tx: mpsc::UnboundedSender<(String, serde_json::Value)>,
    }

    #[async_trait]
    impl AnalyticsSink for RecordingSink {
        async fn track(&self, event: &str, payload: serde_json::Value) -> Result<(), DomainError> {
            let _ = self.tx.send((event.to_string(), payload));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AnalyticsSink for FailingSink {
        async fn track(&self, event: &str, _payload: serde_json::Value) -> Result<(), DomainError> {
            Err(DomainError::analytics_track(event, "sink offline"))
        }
    }

    /// Rejects a configurable phase
    struct Gate {
        create: bool,
        created: bool,
        loaded: bool,
        success: bool,
    }

    impl Gate {
        fn open() -> Self {
            Self {
                create: false,
                created: false,
                loaded: false,
                success: false,
            }
        }
    }

    fn verdict(reject: bool) -> HookResult {
        Ok(reject.then(|| PolicyDecision::reject("blocked by gate")))
    }

    #[async_trait]
    impl Plugin for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        fn required_verify_fields(&self) -> Vec<VerifyField> {
            vec![VerifyField::Namespace]
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::new("gate", Arc::new(42u32))]
        }

        async fn before_create_key(&self, _input: &CreateKeyInput) -> HookResult {
            verdict(self.create)
        }

        async fn on_key_created(&self, _record: &KeyRecord) -> HookResult {
            verdict(self.created)
        }

        async fn on_key_record_loaded(&self, _input: &VerifyInput, _record: &KeyRecord) -> HookResult {
            verdict(self.loaded)
        }

        async fn on_verify_success(&self, _input: &VerifyInput, _record: &KeyRecord) -> HookResult {
            verdict(self.success)
        }
    }

    struct SetupFails {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Plugin for SetupFails {
        fn name(&self) -> &str {
            "setup_fails"
        }

        async fn setup(&self) -> Result<(), PluginError> {
            self.ran.store(true, Ordering::SeqCst);
            Err(PluginError::setup_failed("setup_fails", "no backend"))
        }
    }

    #[tokio::test]
    async fn test_create_then_verify() {
        let fixture = Fixture::new();
        let service = fixture.service().await;

        let created = service
            .create_key(CreateKeyInput::new().with_owner_id("user-1"))
            .await
            .unwrap();

        assert!(created.plaintext.starts_with("sk_test_"));
        assert_eq!(created.plaintext.len(), "sk_test_".len() + 32);
        assert_ne!(created.record.hash(), created.plaintext);

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();

        assert!(outcome.valid);
        assert_eq!(outcome.key_id, Some(created.id));
        assert_eq!(outcome.owner_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_plaintext_is_not_persisted() {
        let fixture = Fixture::new();
        let service = fixture.service().await;

        let created = service.create_key(CreateKeyInput::new()).await.unwrap();
        let stored = fixture.store.find_key_by_id(&created.id).await.unwrap().unwrap();

        let json = serde_json::to_string(&stored).unwrap();
        assert!(!json.contains(&created.plaintext));
        assert_eq!(
            stored.hash(),
            KeyHasher::from_secret(Some("pepper")).hash(&created.plaintext)
        );
    }

    #[tokio::test]
    async fn test_prefix_override() {
        let fixture = Fixture::new();
        let service = fixture.service().await;

        let created = service
            .create_key(CreateKeyInput::new().with_prefix("pk_"))
            .await
            .unwrap();
        assert!(created.plaintext.starts_with("pk_"));
        assert_eq!(created.record.prefix(), "pk_");

        let err = service
            .create_key(CreateKeyInput::new().with_prefix("bad prefix"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let fixture = Fixture::new();
        let service = fixture.service().await;

        let outcome = service
            .verify_key(VerifyInput::new("sk_test_nope"))
            .await
            .unwrap();

        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some(reason::NOT_FOUND));
        assert!(outcome.key_id.is_none());
    }

    #[tokio::test]
    async fn test_expired_key() {
        let fixture = Fixture::new();
        let service = fixture.service().await;

        let expires_at = fixture.clock.now() + Duration::minutes(5);
        let created = service
            .create_key(CreateKeyInput::new().with_expires_at(expires_at))
            .await
            .unwrap();

        assert!(service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap()
            .valid);

        fixture.clock.set(expires_at);

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some(reason::EXPIRED));

        // Without auto-delete the record stays
        assert!(service.get_key(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_key_auto_deleted() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_config(fixture.config().with_auto_delete_expired(true))
            .build()
            .await
            .unwrap();

        let created = service
            .create_key(CreateKeyInput::new().with_expires_at(fixture.clock.now()))
            .await
            .unwrap();

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some(reason::EXPIRED));
        assert!(service.get_key(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service.create_key(CreateKeyInput::new()).await.unwrap();

        let first = service.revoke_key(&created.id).await.unwrap().unwrap();
        let revoked_at = first.revoked_at().unwrap();

        fixture.clock.advance(Duration::minutes(1));
        let second = service.revoke_key(&created.id).await.unwrap().unwrap();
        assert_eq!(second.revoked_at(), Some(revoked_at));

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some(reason::REVOKED));
        assert_eq!(outcome.key_id, Some(created.id));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_errors() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let id = KeyId::new("missing").unwrap();

        assert!(service.revoke_key(&id).await.unwrap().is_none());
        assert!(!service.hard_remove_key(&id).await.unwrap());
        assert!(service
            .extend_key_expiry(&id, Duration::hours(1))
            .await
            .unwrap()
            .is_none());
        assert!(service
            .update_metadata(&id, Metadata::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_hard_remove() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service.create_key(CreateKeyInput::new()).await.unwrap();

        assert!(service.hard_remove_key(&created.id).await.unwrap());
        assert!(!service.hard_remove_key(&created.id).await.unwrap());

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some(reason::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_extend_key_expiry() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let now = fixture.clock.now();

        let open_ended = service.create_key(CreateKeyInput::new()).await.unwrap();
        let extended = service
            .extend_key_expiry(&open_ended.id, Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.expires_at(), Some(now + Duration::hours(1)));

        let dated = service
            .create_key(CreateKeyInput::new().with_expires_at(now + Duration::days(1)))
            .await
            .unwrap();
        let extended = service
            .extend_key_expiry(&dated.id, Duration::days(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.expires_at(), Some(now + Duration::days(2)));

        let stored = service.get_key(&dated.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at(), Some(now + Duration::days(2)));
    }

    #[tokio::test]
    async fn test_extend_key_expiry_out_of_range() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service.create_key(CreateKeyInput::new()).await.unwrap();

        for delta in [Duration::MAX, Duration::MIN] {
            let err = service
                .extend_key_expiry(&created.id, delta)
                .await
                .err()
                .unwrap();
            assert_eq!(err.code(), ErrorCode::ValidationFailed);
        }

        let stored = service.get_key(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at(), None);
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service
            .create_key(CreateKeyInput::new().with_metadata("plan", json!("free")))
            .await
            .unwrap();

        let patch = Metadata::from([("team".to_string(), json!("core"))]);
        service.update_metadata(&created.id, patch).await.unwrap();

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        let metadata = outcome.metadata.unwrap();
        assert_eq!(metadata["plan"], "free");
        assert_eq!(metadata["team"], "core");

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext).without_metadata())
            .await
            .unwrap();
        assert!(outcome.metadata.is_none());
    }

    #[tokio::test]
    async fn test_usage_gate_without_plugin_only_reads() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service
            .create_key(CreateKeyInput::new().with_uses_remaining(2))
            .await
            .unwrap();

        for _ in 0..3 {
            let outcome = service
                .verify_key(VerifyInput::new(&created.plaintext))
                .await
                .unwrap();
            assert!(outcome.valid);
        }

        let exhausted = service
            .create_key(CreateKeyInput::new().with_uses_remaining(0))
            .await
            .unwrap();
        let outcome = service
            .verify_key(VerifyInput::new(&exhausted.plaintext))
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some(reason::USAGE_EXCEEDED));
    }

    #[tokio::test]
    async fn test_usage_limit_plugin_decrements() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(UsageLimitPlugin::new(fixture.store.clone())))
            .build()
            .await
            .unwrap();

        let created = service
            .create_key(CreateKeyInput::new().with_uses_remaining(2))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(
                service
                    .verify_key(VerifyInput::new(&created.plaintext))
                    .await
                    .unwrap(),
            );
        }

        assert!(outcomes[0].valid);
        assert!(outcomes[1].valid);
        assert!(!outcomes[2].valid);
        assert_eq!(outcomes[2].reason.as_deref(), Some(reason::USAGE_EXCEEDED));
    }

    /// Revokes the key through the store while the verification is in flight
    struct RevokeOnLoad {
        store: Arc<InMemoryKeyStore>,
        clock: ManualClock,
    }

    #[async_trait]
    impl Plugin for RevokeOnLoad {
        fn name(&self) -> &str {
            "revoke_on_load"
        }

        async fn on_key_record_loaded(&self, _input: &VerifyInput, record: &KeyRecord) -> HookResult {
            self.store
                .revoke_key_by_id(record.id(), self.clock.now())
                .await?;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_usage_spend_keeps_concurrent_revocation() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(RevokeOnLoad {
                store: fixture.store.clone(),
                clock: fixture.clock.clone(),
            }))
            .with_plugin(Arc::new(UsageLimitPlugin::new(fixture.store.clone())))
            .build()
            .await
            .unwrap();

        let created = service
            .create_key(CreateKeyInput::new().with_uses_remaining(5))
            .await
            .unwrap();

        // Passes on the snapshot loaded before the revocation landed
        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert!(outcome.valid);

        let stored = service.get_key(&created.id).await.unwrap().unwrap();
        assert!(stored.revoked_at().is_some());
        assert_eq!(stored.uses_remaining(), Some(4));

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some(reason::REVOKED));
    }

    #[tokio::test]
    async fn test_required_field_missing() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(Gate::open()))
            .build()
            .await
            .unwrap();

        let created = service.create_key(CreateKeyInput::new()).await.unwrap();

        let err = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(err.to_string().contains("namespace"));

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext).with_namespace("api"))
            .await
            .unwrap();
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_before_create_reject_blocks() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(Gate {
                create: true,
                ..Gate::open()
            }))
            .build()
            .await
            .unwrap();

        let err = service.create_key(CreateKeyInput::new()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::PluginBlocked);
        let payload = err.to_payload();
        assert_eq!(payload.meta["plugin"], "gate");
        assert_eq!(payload.meta["reason"], "blocked by gate");
        assert!(fixture.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_on_key_created_reject_rolls_back() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(Gate {
                created: true,
                ..Gate::open()
            }))
            .build()
            .await
            .unwrap();

        let err = service.create_key(CreateKeyInput::new()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::PluginBlocked);
        assert!(fixture.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_verify_hook_rejections_surface_reason() {
        for gate in [
            Gate {
                loaded: true,
                ..Gate::open()
            },
            Gate {
                success: true,
                ..Gate::open()
            },
        ] {
            let fixture = Fixture::new();
            let service = fixture
                .builder()
                .with_plugin(Arc::new(gate))
                .build()
                .await
                .unwrap();
            let created = service.create_key(CreateKeyInput::new()).await.unwrap();

            let outcome = service
                .verify_key(VerifyInput::new(&created.plaintext).with_namespace("api"))
                .await
                .unwrap();

            assert!(!outcome.valid);
            assert_eq!(outcome.reason.as_deref(), Some("blocked by gate"));
            assert_eq!(outcome.key_id, Some(created.id));
        }
    }

    #[tokio::test]
    async fn test_revoked_check_precedes_record_hooks() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(Gate {
                loaded: true,
                ..Gate::open()
            }))
            .build()
            .await
            .unwrap();
        let created = service.create_key(CreateKeyInput::new()).await.unwrap();
        service.revoke_key(&created.id).await.unwrap();

        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext).with_namespace("api"))
            .await
            .unwrap();
        assert_eq!(outcome.reason.as_deref(), Some(reason::REVOKED));
    }

    #[tokio::test]
    async fn test_capability_lookup() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_plugin(Arc::new(Gate::open()))
            .build()
            .await
            .unwrap();

        assert_eq!(*service.capability::<u32>("gate").unwrap(), 42);
        assert!(service.capability::<String>("gate").is_none());
        assert!(service.capability::<u32>("missing").is_none());
    }

    #[tokio::test]
    async fn test_setup_failure_does_not_abort_build() {
        let fixture = Fixture::new();
        let ran = Arc::new(AtomicBool::new(false));

        let service = fixture
            .builder()
            .with_plugin(Arc::new(SetupFails { ran: ran.clone() }))
            .build()
            .await
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(service.plugins().names(), vec!["setup_fails"]);
    }

    #[tokio::test]
    async fn test_duplicate_plugin_names_fail_build() {
        let fixture = Fixture::new();

        let err = fixture
            .builder()
            .with_plugin(Arc::new(Gate::open()))
            .with_plugin(Arc::new(Gate::open()))
            .build()
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ConfigurationFailed);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let now = fixture.clock.now();

        let mut expired = Vec::new();
        for minutes in [-30, -10, 0] {
            let created = service
                .create_key(CreateKeyInput::new().with_expires_at(now + Duration::minutes(minutes)))
                .await
                .unwrap();
            expired.push(created.id);
        }
        let future = service
            .create_key(CreateKeyInput::new().with_expires_at(now + Duration::minutes(10)))
            .await
            .unwrap();
        let forever = service.create_key(CreateKeyInput::new()).await.unwrap();

        let result = service
            .sweep_expired(SweepOptions::default().with_batch_size(10).with_older_than(now))
            .await
            .unwrap();

        assert_eq!(result.processed, 3);
        assert_eq!(result.removed, 3);
        assert_eq!(result.failed, 0);
        assert!(!result.remaining_hint);

        for id in &expired {
            assert!(service.get_key(id).await.unwrap().is_none());
        }
        assert!(service.get_key(&future.id).await.unwrap().is_some());
        assert!(service.get_key(&forever.id).await.unwrap().is_some());

        let result = service
            .sweep_expired(SweepOptions::default().with_batch_size(10).with_older_than(now))
            .await
            .unwrap();
        assert_eq!(result, SweepResult::default());
    }

    #[tokio::test]
    async fn test_sweep_full_batch_sets_hint() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let past = fixture.clock.now() - Duration::hours(1);

        for _ in 0..3 {
            service
                .create_key(CreateKeyInput::new().with_expires_at(past))
                .await
                .unwrap();
        }

        let first = service
            .sweep_expired(SweepOptions::default().with_batch_size(2))
            .await
            .unwrap();
        assert_eq!(first.removed, 2);
        assert!(first.remaining_hint);

        let second = service
            .sweep_expired(SweepOptions::default().with_batch_size(2))
            .await
            .unwrap();
        assert_eq!(second.removed, 1);
        assert!(!second.remaining_hint);
    }

    #[tokio::test]
    async fn test_sweep_counts_failures() {
        let mut store = MockKeyStore::new();
        store.expect_ready().returning(|| Ok(()));
        store.expect_find_expired_ids().returning(|_, _| {
            Ok(vec![KeyId::new("a").unwrap(), KeyId::new("b").unwrap()])
        });
        store.expect_hard_remove_key_by_id().returning(|id| {
            if id.as_str() == "a" {
                Ok(true)
            } else {
                Err(DomainError::storage("connection reset"))
            }
        });

        let service = KeyService::builder(Arc::new(store)).build().await.unwrap();
        let result = service.sweep_expired(SweepOptions::default()).await.unwrap();

        assert_eq!(result.processed, 2);
        assert_eq!(result.removed, 1);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_sweep_unsupported_store() {
        struct NoScanStore(InMemoryKeyStore);

        #[async_trait]
        impl KeyStore for NoScanStore {
            async fn create_key(&self, record: KeyRecord) -> Result<(), DomainError> {
                self.0.create_key(record).await
            }
            async fn find_key_by_hash(&self, hash: &str) -> Result<Option<KeyRecord>, DomainError> {
                self.0.find_key_by_hash(hash).await
            }
            async fn find_key_by_id(&self, id: &KeyId) -> Result<Option<KeyRecord>, DomainError> {
                self.0.find_key_by_id(id).await
            }
            async fn update_key(&self, record: &KeyRecord) -> Result<(), DomainError> {
                self.0.update_key(record).await
            }
            async fn spend_use(&self, id: &KeyId) -> Result<UseSpend, DomainError> {
                self.0.spend_use(id).await
            }
            async fn revoke_key_by_id(
                &self,
                id: &KeyId,
                revoked_at: DateTime<Utc>,
            ) -> Result<(), DomainError> {
                self.0.revoke_key_by_id(id, revoked_at).await
            }
            async fn hard_remove_key_by_id(&self, id: &KeyId) -> Result<bool, DomainError> {
                self.0.hard_remove_key_by_id(id).await
            }
        }

        let service = KeyService::builder(Arc::new(NoScanStore(InMemoryKeyStore::new())))
            .build()
            .await
            .unwrap();

        let err = service
            .sweep_expired(SweepOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SweepUnsupported);
    }

    #[tokio::test]
    async fn test_store_failures_are_classified() {
        let mut store = MockKeyStore::new();
        store.expect_ready().returning(|| Ok(()));
        store
            .expect_find_key_by_hash()
            .returning(|_| Err(DomainError::storage("connection reset")));
        store
            .expect_create_key()
            .returning(|_| Err(DomainError::storage_permanent("duplicate hash")));
        store.expect_find_key_by_id().returning(|id| {
            Ok(Some(KeyRecord::new(id.clone(), "sk_", "digest", Utc::now())))
        });
        store
            .expect_revoke_key_by_id()
            .returning(|_, _| Err(DomainError::storage("timeout")));

        let service = KeyService::builder(Arc::new(store)).build().await.unwrap();

        let err = service.verify_key(VerifyInput::new("k")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::KeystoreReadFailed);
        assert!(err.is_retryable());
        assert_eq!(
            err.to_payload().cause.as_deref(),
            Some("Storage error: connection reset")
        );

        let err = service.create_key(CreateKeyInput::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::KeystoreWriteFailed);
        assert!(!err.is_retryable());

        let err = service
            .revoke_key(&KeyId::new("k1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::KeystoreRevokeFailed);
    }

    #[tokio::test]
    async fn test_not_ready_store_fails_build() {
        let mut store = MockKeyStore::new();
        store
            .expect_ready()
            .returning(|| Err(DomainError::storage("database unreachable")));

        let err = KeyService::builder(Arc::new(store)).build().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageFailed);
    }

    #[tokio::test]
    async fn test_analytics_events() {
        let fixture = Fixture::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = fixture
            .builder()
            .with_analytics(Arc::new(RecordingSink { tx }))
            .build()
            .await
            .unwrap();

        let created = service.create_key(CreateKeyInput::new()).await.unwrap();
        service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();
        service.revoke_key(&created.id).await.unwrap();

        let mut events = Vec::new();
        for _ in 0..3 {
            let (event, payload) =
                tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
            assert_eq!(payload["key_id"], created.id.as_str());
            assert!(!payload.to_string().contains(&created.plaintext));
            events.push(event);
        }
        events.sort();

        assert_eq!(
            events,
            vec![event::KEY_CREATED, event::KEY_REVOKED, event::KEY_VERIFIED]
        );
    }

    #[tokio::test]
    async fn test_analytics_failure_is_not_propagated() {
        let fixture = Fixture::new();
        let service = fixture
            .builder()
            .with_analytics(Arc::new(FailingSink))
            .build()
            .await
            .unwrap();

        let created = service.create_key(CreateKeyInput::new()).await.unwrap();
        let outcome = service
            .verify_key(VerifyInput::new(&created.plaintext))
            .await
            .unwrap();

        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_created_key_debug_redacts_plaintext() {
        let fixture = Fixture::new();
        let service = fixture.service().await;
        let created = service.create_key(CreateKeyInput::new()).await.unwrap();

        assert!(!format!("{:?}", created).contains(&created.plaintext));
    }
}
