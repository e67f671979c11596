use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::rand_core::{CryptoRngCore, OsRng};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::digest::FixedOutputReset;
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::{DigestAlgorithm, KeyPair};
use crate::error::{KeysignError, Result};

impl KeyPair {
    /// RSASSA-PSS signature over `data` with this key's digest and salt length.
    pub fn sign_pss(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.sign_pss_with_rng(&mut OsRng, data)
    }

    pub fn sign_pss_with_rng<R: CryptoRngCore>(&self, rng: &mut R, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.private_key();
        let salt_length = self.salt_length();
        match self.digest() {
            DigestAlgorithm::Sha256 => sign_with::<Sha256, R>(key, salt_length, rng, data),
            DigestAlgorithm::Sha384 => sign_with::<Sha384, R>(key, salt_length, rng, data),
            DigestAlgorithm::Sha512 => sign_with::<Sha512, R>(key, salt_length, rng, data),
        }
    }
}

fn sign_with<D, R>(key: &RsaPrivateKey, salt_length: usize, rng: &mut R, data: &[u8]) -> Result<Vec<u8>>
where
    D: Digest + FixedOutputReset,
    R: CryptoRngCore,
{
    let signing_key = SigningKey::<D>::new_with_salt_len(key.clone(), salt_length);
    let signature = signing_key
        .try_sign_with_rng(rng, data)
        .map_err(|e| KeysignError::Crypto(format!("pss signing failed: {e}")))?;
    Ok(signature.to_vec())
}

/// Check an RSASSA-PSS signature. Any mismatch is `BadSignature`.
pub fn verify_pss(
    public_key: &RsaPublicKey,
    digest: DigestAlgorithm,
    salt_length: usize,
    data: &[u8],
    signature: &[u8],
) -> Result<()> {
    match digest {
        DigestAlgorithm::Sha256 => verify_with::<Sha256>(public_key, salt_length, data, signature),
        DigestAlgorithm::Sha384 => verify_with::<Sha384>(public_key, salt_length, data, signature),
        DigestAlgorithm::Sha512 => verify_with::<Sha512>(public_key, salt_length, data, signature),
    }
}

fn verify_with<D>(public_key: &RsaPublicKey, salt_length: usize, data: &[u8], signature: &[u8]) -> Result<()>
where
    D: Digest + FixedOutputReset,
{
    let verifying_key = VerifyingKey::<D>::new_with_salt_len(public_key.clone(), salt_length);
    let signature = Signature::try_from(signature)
        .map_err(|e| KeysignError::BadSignature(format!("malformed signature: {e}")))?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| KeysignError::BadSignature("signatures do not match".to_string()))
}
