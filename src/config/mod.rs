mod app_config;

pub use app_config::{
    AppConfig, KeyStoreBackend, KeysConfig, LogFormat, LoggingConfig, RateLimitBackend,
    StorageConfig,
};
