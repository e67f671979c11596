//! Configuration for the key store, key generation, verification and the
//! transport hook.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::keys::DigestAlgorithm;

/// Schema version written into the metadata partition on first open.
pub const SCHEMA_VERSION: u32 = 1;

/// Default modulus size for generated keys.
pub const DEFAULT_MODULUS_BITS: usize = 2048;

/// Default store location
pub fn default_store_path() -> PathBuf {
    PathBuf::from(".keysign").join("keys.sled")
}

/// Key store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory of the sled database
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Schema version this build expects
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Remove the database when the last handle is dropped
    #[serde(default)]
    pub temporary: bool,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            schema_version: SCHEMA_VERSION,
            temporary: false,
        }
    }
}

impl StoreConfig {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Parameters for newly generated key pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    pub modulus_bits: usize,
    pub digest: DigestAlgorithm,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            modulus_bits: DEFAULT_MODULUS_BITS,
            digest: DigestAlgorithm::Sha256,
        }
    }
}

/// Signature verification settings
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Largest accepted distance between `x-date` and the verifier's clock
    pub max_skew: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_skew: Duration::minutes(5),
        }
    }
}

/// Transport hook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Path of the login endpoint; `POST` to it is never signed
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

fn default_login_path() -> String {
    "/keys".to_string()
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_options_default_to_2048_sha256() {
        let options = KeyOptions::default();
        assert_eq!(options.modulus_bits, 2048);
        assert_eq!(options.digest, DigestAlgorithm::Sha256);
    }

    #[test]
    fn store_config_fills_missing_fields() {
        let config: StoreConfig = serde_json::from_str(r#"{"path": "/tmp/k"}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/k"));
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert!(!config.temporary);
    }

    #[test]
    fn hook_exempts_keys_endpoint_by_default() {
        assert_eq!(HookConfig::default().login_path, "/keys");
    }
}
