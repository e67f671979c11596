use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::RsaPrivateKey;
use rsa::rand_core::{CryptoRngCore, OsRng};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::KeyPair;
use crate::config::KeyOptions;
use crate::error::{KeysignError, Result};

/// Produces fresh RSA-PSS key pairs. Generated keys are local-only.
pub struct KeyGenerator;

impl KeyGenerator {
    /// Generate from the OS RNG on the blocking pool; RSA prime search is
    /// CPU-bound.
    pub async fn generate(options: KeyOptions) -> Result<KeyPair> {
        tokio::task::spawn_blocking(move || Self::generate_with_rng(&mut OsRng, options))
            .await
            .map_err(|e| KeysignError::Crypto(format!("key generation task failed: {e}")))?
    }

    pub fn generate_with_rng<R>(rng: &mut R, options: KeyOptions) -> Result<KeyPair>
    where
        R: CryptoRngCore + ?Sized,
    {
        let KeyOptions { modulus_bits, digest } = options;
        let salt_length = digest.salt_length(modulus_bits).ok_or_else(|| {
            KeysignError::Crypto(format!("{modulus_bits}-bit modulus is too small for {digest}"))
        })?;

        info!(modulus_bits, %digest, "Generating new key pair");
        let private_key = RsaPrivateKey::new(rng, modulus_bits)?;
        debug!(salt_length, "Generated key pair");

        Ok(KeyPair::from_parts(private_key, digest, salt_length, None))
    }

    /// Deterministic generation: the SHA-256 hash of `seed` seeds a CSPRNG.
    pub fn from_seed(seed: &str, options: KeyOptions) -> Result<KeyPair> {
        let hash = Sha256::digest(seed.as_bytes());
        let mut rng = ChaCha20Rng::from_seed(hash.into());
        Self::generate_with_rng(&mut rng, options)
    }
}
