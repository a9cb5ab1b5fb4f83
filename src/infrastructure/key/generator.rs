//! Key generation
//!
//! Produces plaintext key material from a configured kind and prefix,
//! drawing entropy from an injected [`RandomSource`].

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::domain::{DomainError, RandomSource};

const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Caller-supplied generator; its output is used verbatim, without prefix
pub type CustomGenerator =
    Arc<dyn Fn(&dyn RandomSource) -> Result<String, DomainError> + Send + Sync>;

/// Shape of the random key body
#[derive(Clone)]
pub enum KeyKind {
    /// Hyphenated UUIDv4
    Uuid,
    /// URL-safe base64 alphabet, `n` characters
    UrlSafe(usize),
    /// Lowercase hex, `n` characters
    Hex(usize),
    /// Crockford base32 alphabet, `n` characters
    Base32Crockford(usize),
    /// Fully custom; bypasses prefixing
    Custom(CustomGenerator),
}

impl KeyKind {
    /// Parse a configured kind name; `length` is ignored for UUIDs
    pub fn from_name(name: &str, length: usize) -> Result<Self, DomainError> {
        match name.to_lowercase().as_str() {
            "uuid" => Ok(Self::Uuid),
            "url_safe" | "urlsafe" | "base64" => Ok(Self::UrlSafe(length)),
            "hex" => Ok(Self::Hex(length)),
            "base32" | "base32_crockford" | "crockford" => Ok(Self::Base32Crockford(length)),
            _ => Err(DomainError::configuration(format!(
                "Unknown key kind: {}. Valid kinds: uuid, url_safe, hex, base32",
                name
            ))),
        }
    }

    pub fn custom<F>(generator: F) -> Self
    where
        F: Fn(&dyn RandomSource) -> Result<String, DomainError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(generator))
    }
}

impl Default for KeyKind {
    fn default() -> Self {
        Self::UrlSafe(32)
    }
}

impl fmt::Debug for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid => write!(f, "Uuid"),
            Self::UrlSafe(n) => write!(f, "UrlSafe({})", n),
            Self::Hex(n) => write!(f, "Hex({})", n),
            Self::Base32Crockford(n) => write!(f, "Base32Crockford({})", n),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Generator for plaintext keys
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    /// Prefix for all generated keys (e.g., "sk_live_")
    prefix: String,
    kind: KeyKind,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    /// Generate a key with the configured prefix
    pub fn generate(&self, random: &dyn RandomSource) -> Result<String, DomainError> {
        self.generate_with_prefix(random, &self.prefix)
    }

    /// Generate a key with an explicit prefix
    pub fn generate_with_prefix(
        &self,
        random: &dyn RandomSource,
        prefix: &str,
    ) -> Result<String, DomainError> {
        let body = match &self.kind {
            KeyKind::Custom(generator) => return generator(random),
            KeyKind::Uuid => {
                let mut bytes = [0u8; 16];
                random.fill_bytes(&mut bytes)?;
                uuid::Builder::from_random_bytes(bytes)
                    .into_uuid()
                    .hyphenated()
                    .to_string()
            }
            KeyKind::UrlSafe(len) => {
                let bytes = random_bytes(random, (len * 3).div_ceil(4))?;
                truncate(URL_SAFE_NO_PAD.encode(bytes), *len)
            }
            KeyKind::Hex(len) => {
                let bytes = random_bytes(random, len.div_ceil(2))?;
                truncate(hex::encode(bytes), *len)
            }
            KeyKind::Base32Crockford(len) => random_bytes(random, *len)?
                .into_iter()
                .map(|b| CROCKFORD_ALPHABET[(b & 0x1f) as usize] as char)
                .collect(),
        };

        Ok(format!("{}{}", prefix, body))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new("", KeyKind::default())
    }
}

fn random_bytes(random: &dyn RandomSource, len: usize) -> Result<Vec<u8>, DomainError> {
    let mut bytes = vec![0u8; len];
    if len > 0 {
        random.fill_bytes(&mut bytes)?;
    }
    Ok(bytes)
}

// Encoders only emit ASCII, so byte truncation is safe
fn truncate(mut encoded: String, len: usize) -> String {
    encoded.truncate(len);
    encoded
}
