//! Key domain
//!
//! Types and traits for issuing and verifying keys: the persisted record,
//! the store contract, and the inputs and outcomes of key operations.

mod entity;
mod input;
mod repository;
mod validation;

pub use entity::{KeyId, KeyRecord, KeyStatus, Metadata};
pub use input::{reason, CreateKeyInput, VerifyField, VerifyInput, VerifyOutcome};
pub use repository::{KeyStore, UseSpend};
pub use validation::{validate_key_id, validate_prefix, KeyValidationError};

#[cfg(test)]
pub use repository::MockKeyStore;
