//! Key infrastructure
//!
//! Key generation and hashing, the key store adapters and the key service.

mod config;
mod generator;
mod hasher;
mod memory;
mod postgres;
pub mod random;
mod service;

pub use config::{CryptoProvider, KeyServiceConfig};
pub use generator::{CustomGenerator, KeyGenerator, KeyKind};
pub use hasher::{CustomHasher, KeyHasher};
pub use memory::InMemoryKeyStore;
pub use postgres::PostgresKeyStore;
pub use random::{OsRandom, SeededRandom};
pub use service::{
    CreatedKey, KeyService, KeyServiceBuilder, SweepOptions, SweepResult, DEFAULT_SWEEP_BATCH,
    MAX_SWEEP_BATCH,
};
