use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeysignError;

/// Digest used by the PSS encoding of a key's signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl DigestAlgorithm {
    /// Output length in bytes.
    pub fn output_size(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Maximum PSS salt length for a modulus of `modulus_bits` (RFC 3447 §9.1).
    ///
    /// `emLen = ceil((modBits - 1) / 8)`, salt = `emLen - hLen - 2`. Returns
    /// `None` when the modulus is too small to fit the digest.
    pub fn salt_length(self, modulus_bits: usize) -> Option<usize> {
        let em_len = modulus_bits.checked_sub(1)?.div_ceil(8);
        em_len.checked_sub(self.output_size() + 2)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = KeysignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA-256" | "SHA256" => Ok(DigestAlgorithm::Sha256),
            "SHA-384" | "SHA384" => Ok(DigestAlgorithm::Sha384),
            "SHA-512" | "SHA512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(KeysignError::UnsupportedDigest(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_salt_for_2048_bit_modulus() {
        assert_eq!(DigestAlgorithm::Sha256.salt_length(2048), Some(222));
    }

    #[test]
    fn salt_rounds_encoded_length_up() {
        // 2049 bits -> emLen = ceil(2048 / 8) = 256
        assert_eq!(DigestAlgorithm::Sha256.salt_length(2049), Some(222));
        // 2050 bits -> emLen = ceil(2049 / 8) = 257
        assert_eq!(DigestAlgorithm::Sha256.salt_length(2050), Some(223));
    }

    #[test]
    fn larger_digests_shrink_salt() {
        assert_eq!(DigestAlgorithm::Sha384.salt_length(2048), Some(206));
        assert_eq!(DigestAlgorithm::Sha512.salt_length(4096), Some(446));
    }

    #[test]
    fn tiny_modulus_has_no_salt_length() {
        assert_eq!(DigestAlgorithm::Sha512.salt_length(512), None);
        assert_eq!(DigestAlgorithm::Sha256.salt_length(0), None);
    }

    #[test]
    fn parses_common_spellings() {
        assert_eq!("SHA-256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha384".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha384);
        assert_eq!("Sha-512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
    }

    #[test]
    fn rejects_digest_outside_table() {
        let error = "SHA-1".parse::<DigestAlgorithm>().unwrap_err();
        assert!(matches!(error, KeysignError::UnsupportedDigest(name) if name == "SHA-1"));
    }

    #[test]
    fn serializes_with_canonical_name() {
        let json = serde_json::to_string(&DigestAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"SHA-256\"");
    }
}
