use std::fmt;

use chrono::{DateTime, Utc};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::DigestAlgorithm;

/// Server-issued identity of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub key_id: String,
    pub valid_until: DateTime<Utc>,
}

/// Where a key pair sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Generated locally, never registered.
    Local,
    /// Registered and not yet expired.
    Registered,
    /// Registered, but `valid_until` has passed.
    Expired,
}

/// An RSA-PSS signing key pair plus the parameters needed to sign with it.
///
/// Key id and expiry live together in [`Registration`], so a key is either
/// registered or local-only.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    digest: DigestAlgorithm,
    salt_length: usize,
    registration: Option<Registration>,
}

impl KeyPair {
    pub(crate) fn from_parts(
        private_key: RsaPrivateKey,
        digest: DigestAlgorithm,
        salt_length: usize,
        registration: Option<Registration>,
    ) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            private_key,
            public_key,
            digest,
            salt_length,
            registration,
        }
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    pub fn salt_length(&self) -> usize {
        self.salt_length
    }

    pub fn modulus_bits(&self) -> usize {
        self.public_key.n().bits()
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.key_id.as_str())
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.registration.as_ref().map(|r| r.valid_until)
    }

    /// Attach the identity the server issued for this key's public half.
    pub fn register(&mut self, key_id: impl Into<String>, valid_until: DateTime<Utc>) {
        self.registration = Some(Registration {
            key_id: key_id.into(),
            valid_until,
        });
    }

    pub fn state(&self, now: DateTime<Utc>) -> KeyState {
        match &self.registration {
            None => KeyState::Local,
            Some(r) if r.valid_until > now => KeyState::Registered,
            Some(_) => KeyState::Expired,
        }
    }

    /// True iff registered and `valid_until > now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == KeyState::Registered
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("modulus_bits", &self.modulus_bits())
            .field("digest", &self.digest)
            .field("salt_length", &self.salt_length)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}
