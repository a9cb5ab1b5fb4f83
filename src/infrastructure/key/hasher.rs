//! One-way key hashing
//!
//! Digests are what the key store persists and indexes. They are
//! deterministic for a given (plaintext, secret) pair.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Caller-supplied hash function
pub type CustomHasher = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Hashing strategy for key material
#[derive(Clone, Default)]
pub enum KeyHasher {
    /// Plain SHA-256, hex encoded
    #[default]
    Sha256,
    /// HMAC-SHA256 keyed with a server-side secret, hex encoded
    HmacSha256(Vec<u8>),
    /// Fully custom
    Custom(CustomHasher),
}

impl KeyHasher {
    /// SHA-256 without a secret, HMAC-SHA256 with one
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self::HmacSha256(secret.as_bytes().to_vec()),
            _ => Self::Sha256,
        }
    }

    pub fn custom<F>(hasher: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(hasher))
    }

    /// Hash a plaintext key for storage or lookup
    pub fn hash(&self, plaintext: &str) -> String {
        match self {
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(plaintext.as_bytes());
                hex::encode(hasher.finalize())
            }
            Self::HmacSha256(secret) => {
                // HMAC accepts keys of any length, so construction cannot fail
                let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
                    .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
                mac.update(plaintext.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Self::Custom(hasher) => hasher(plaintext),
        }
    }

    /// Check a plaintext key against a stored digest
    pub fn matches(&self, plaintext: &str, digest: &str) -> bool {
        constant_time_compare(&self.hash(plaintext), digest)
    }
}

impl fmt::Debug for KeyHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "Sha256"),
            Self::HmacSha256(_) => write!(f, "HmacSha256(<secret>)"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
