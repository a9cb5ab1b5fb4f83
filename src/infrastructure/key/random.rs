//! Random byte sources

use std::sync::Mutex;

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

use crate::domain::{DomainError, RandomSource};

/// Operating system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), DomainError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| DomainError::key_generation(format!("OS random source failed: {}", e)))
    }
}

/// Deterministic generator for tests; never use for real keys
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), DomainError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| DomainError::key_generation("seeded random source poisoned"))?;
        rng.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_random_is_deterministic() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);

        let mut left = [0u8; 16];
        let mut right = [0u8; 16];
        a.fill_bytes(&mut left).unwrap();
        b.fill_bytes(&mut right).unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn test_os_random_fills() {
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        OsRandom.fill_bytes(&mut first).unwrap();
        OsRandom.fill_bytes(&mut second).unwrap();

        assert_ne!(first, second);
    }
}
