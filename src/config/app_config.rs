use serde::Deserialize;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub keys: KeysConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Key generation and hashing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Prefix prepended to generated keys
    pub prefix: String,
    /// uuid, url_safe, hex or base32
    pub kind: String,
    /// Body length in characters (ignored for uuid)
    pub length: usize,
    /// Enables HMAC-SHA256 hashing when set
    pub hash_secret: Option<String>,
    pub auto_delete_expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub key_store: KeyStoreBackend,
    pub rate_limit_store: RateLimitBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub redis_url: Option<String>,
    /// Allow the non-atomic Redis fallback for servers without scripting
    pub redis_best_effort: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            prefix: "sk_".to_string(),
            kind: "url_safe".to_string(),
            length: 32,
            hash_secret: None,
            auto_delete_expired: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_store: KeyStoreBackend::default(),
            rate_limit_store: RateLimitBackend::default(),
            database_url: None,
            max_connections: 10,
            redis_url: None,
            redis_best_effort: false,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("KEYWARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
