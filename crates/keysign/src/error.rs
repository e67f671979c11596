use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum KeysignError {
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),
    #[error("Key store is blocked: {0}")]
    StoreBlocked(String),
    #[error("Key store error: {0}")]
    Store(String),
    #[error("No active owner is set")]
    NoActiveOwner,
    #[error("No key stored for owner {0}")]
    KeyNotFound(String),
    #[error("The private key was not found")]
    MissingPrivateKey,
    #[error("The public key is not registered")]
    UnregisteredKey,
    #[error("The public key expired at {valid_until}")]
    ExpiredKey { valid_until: DateTime<Utc> },
    #[error("Failed to encode or decode key material: {0}")]
    KeyEncoding(String),
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
    #[error("Bad signature: {0}")]
    BadSignature(String),
    #[error("Header cannot be attached: {0}")]
    InvalidHeader(String),
}

impl KeysignError {
    /// True for the conditions a user resolves by logging in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            KeysignError::MissingPrivateKey
                | KeysignError::UnregisteredKey
                | KeysignError::ExpiredKey { .. }
        )
    }
}

impl From<sled::Error> for KeysignError {
    fn from(error: sled::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<serde_json::Error> for KeysignError {
    fn from(error: serde_json::Error) -> Self {
        Self::Store(format!("record serialization: {error}"))
    }
}

impl From<rsa::Error> for KeysignError {
    fn from(error: rsa::Error) -> Self {
        Self::Crypto(error.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for KeysignError {
    fn from(error: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(error.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for KeysignError {
    fn from(error: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeysignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_private_key_requires_login() {
        assert!(KeysignError::MissingPrivateKey.requires_login());
    }

    #[test]
    fn unregistered_key_requires_login() {
        assert!(KeysignError::UnregisteredKey.requires_login());
    }

    #[test]
    fn expired_key_requires_login() {
        let error = KeysignError::ExpiredKey { valid_until: Utc::now() };
        assert!(error.requires_login());
    }

    #[test]
    fn store_error_is_surfaced_as_is() {
        let error = KeysignError::Store("disk full".into());
        assert!(!error.requires_login());
        assert_eq!(error.to_string(), "Key store error: disk full");
    }

    #[test]
    fn key_not_found_names_owner() {
        let error = KeysignError::KeyNotFound("alice".into());
        assert!(!error.requires_login());
        assert_eq!(error.to_string(), "No key stored for owner alice");
    }
}
