//! Randomness source for key material

use std::fmt::Debug;

use crate::domain::DomainError;

/// Cryptographically secure byte source
///
/// Injected through the crypto provider so tests can swap in a seeded
/// generator without touching process-wide state.
pub trait RandomSource: Send + Sync + Debug {
    /// Fill `dest` with random bytes
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), DomainError>;
}
