//! Key identifier and prefix validation

use thiserror::Error;

/// Errors that can occur while validating key identifiers and prefixes
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyValidationError {
    #[error("Key ID cannot be empty")]
    EmptyId,

    #[error("Key ID exceeds maximum length of {0} characters")]
    IdTooLong(usize),

    #[error("Key ID contains invalid character: '{0}'. Only alphanumeric characters, hyphens and underscores are allowed")]
    InvalidIdCharacter(char),

    #[error("Key prefix exceeds maximum length of {0} characters")]
    PrefixTooLong(usize),

    #[error("Key prefix contains invalid character: '{0}'")]
    InvalidPrefixCharacter(char),
}

const MAX_KEY_ID_LENGTH: usize = 128;
const MAX_PREFIX_LENGTH: usize = 32;

/// Validate a key ID
///
/// Rules:
/// - Cannot be empty
/// - Maximum 128 characters
/// - Only ASCII alphanumeric characters, hyphens and underscores
pub fn validate_key_id(id: &str) -> Result<(), KeyValidationError> {
    if id.is_empty() {
        return Err(KeyValidationError::EmptyId);
    }

    if id.len() > MAX_KEY_ID_LENGTH {
        return Err(KeyValidationError::IdTooLong(MAX_KEY_ID_LENGTH));
    }

    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(KeyValidationError::InvalidIdCharacter(c));
    }

    Ok(())
}

/// Validate a cosmetic key prefix (e.g. "sk_live_")
///
/// Prefixes end up verbatim in the plaintext key, so they are restricted to
/// printable ASCII without whitespace.
pub fn validate_prefix(prefix: &str) -> Result<(), KeyValidationError> {
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(KeyValidationError::PrefixTooLong(MAX_PREFIX_LENGTH));
    }

    if let Some(c) = prefix.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(KeyValidationError::InvalidPrefixCharacter(c));
    }

    Ok(())
}
