use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::KeyPair;
use crate::error::{KeysignError, Result};

/// RSA public key as a JSON Web Key (RFC 7518 §6.3.1), the form sent to the
/// login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub n: String,
    pub e: String,
}

impl PublicJwk {
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_string(),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }

    pub fn to_public_key(&self) -> Result<RsaPublicKey> {
        if self.kty != "RSA" {
            return Err(KeysignError::KeyEncoding(format!("unexpected kty {}", self.kty)));
        }
        let n = decode_component("n", &self.n)?;
        let e = decode_component("e", &self.e)?;
        Ok(RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))?)
    }
}

fn decode_component(name: &str, value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| KeysignError::KeyEncoding(format!("jwk member {name}: {e}")))
}

impl KeyPair {
    /// SubjectPublicKeyInfo PEM of the public half.
    pub fn public_key_pem(&self) -> Result<String> {
        encode_public_key_pem(self.public_key())
    }

    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk::from_public_key(self.public_key())
    }
}

pub(crate) fn encode_public_key_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeysignError::KeyEncoding(format!("public key: {e}")))
}

pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| KeysignError::KeyEncoding(format!("public key: {e}")))
}

pub(crate) fn encode_private_key_pem(key: &RsaPrivateKey) -> Result<String> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeysignError::KeyEncoding(format!("private key: {e}")))?;
    Ok(pem.to_string())
}

pub(crate) fn decode_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| KeysignError::KeyEncoding(format!("private key: {e}")))
}
