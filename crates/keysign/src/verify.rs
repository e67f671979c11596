//! Server-side counterpart of the signer: check an incoming request's
//! `Authorization: Signature ...` header.
//!
//! Every rejection is reported as `BadSignature` with a short reason.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use http::Request;
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use tracing::{debug, warn};

use crate::canonical::{
    CONTENT_LENGTH, MINIMUM_HEADERS, REQUEST_TARGET, X_CONTENT_SHA256, X_DATE, content_sha256,
    request_target,
};
use crate::config::VerifierConfig;
use crate::error::{KeysignError, Result};
use crate::keys::{DigestAlgorithm, KeyPair, verify_pss};
use crate::signer::AUTHORIZATION;

/// Fields of a parsed `Signature` authorization value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    pub headers: Vec<String>,
    pub key_id: String,
    pub signature: Vec<u8>,
}

/// Public half of a registered key, as the server holds it.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    public_key: RsaPublicKey,
    digest: DigestAlgorithm,
    salt_length: usize,
}

impl VerificationKey {
    pub fn new(public_key: RsaPublicKey, digest: DigestAlgorithm) -> Result<Self> {
        let salt_length = digest.salt_length(public_key.n().bits()).ok_or_else(|| {
            KeysignError::Crypto(format!("modulus too small for {digest} PSS salt"))
        })?;
        Ok(Self {
            public_key,
            digest,
            salt_length,
        })
    }

    pub fn from_key_pair(key: &KeyPair) -> Self {
        Self {
            public_key: key.public_key().clone(),
            digest: key.digest(),
            salt_length: key.salt_length(),
        }
    }
}

fn bad(reason: impl Into<String>) -> KeysignError {
    KeysignError::BadSignature(reason.into())
}

/// Parse `Signature headers="..." id="..." signature="..."`.
pub fn parse_authorization(value: &str) -> Result<ParsedAuthorization> {
    let params = value
        .trim()
        .strip_prefix("Signature ")
        .ok_or_else(|| bad("authorization scheme is not Signature"))?;

    let mut headers = None;
    let mut key_id = None;
    let mut signature = None;

    let mut rest = params.trim_start();
    while !rest.is_empty() {
        let (name, after_name) = rest
            .split_once("=\"")
            .ok_or_else(|| bad("malformed authorization parameter"))?;
        let (value, after_value) = after_name
            .split_once('"')
            .ok_or_else(|| bad("unterminated authorization parameter"))?;
        match name.trim() {
            "headers" => headers = Some(value),
            "id" | "keyId" => key_id = Some(value),
            "signature" => signature = Some(value),
            _ => {}
        }
        rest = after_value.trim_start_matches([',', ' ']);
    }

    let headers = headers.ok_or_else(|| bad("missing headers parameter"))?;
    let key_id = key_id.ok_or_else(|| bad("missing id parameter"))?;
    let signature = signature.ok_or_else(|| bad("missing signature parameter"))?;

    Ok(ParsedAuthorization {
        headers: headers
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .collect(),
        key_id: key_id.to_string(),
        signature: STANDARD
            .decode(signature)
            .map_err(|e| bad(format!("signature is not base64: {e}")))?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Verify `request` against the key `resolve` returns for its key id.
    /// Returns the key id on success.
    pub fn verify<F>(&self, request: &Request<Vec<u8>>, now: DateTime<Utc>, resolve: F) -> Result<String>
    where
        F: FnOnce(&str) -> Option<VerificationKey>,
    {
        let authorization = header_value(request, AUTHORIZATION)?;
        let parsed = parse_authorization(authorization)?;

        for required in MINIMUM_HEADERS {
            if !parsed.headers.iter().any(|h| h == required) {
                warn!(header = required, "signature does not cover required header");
                return Err(bad(format!("{required} must be signed")));
            }
        }

        self.check_date(header_value(request, X_DATE)?, now)?;
        check_body(request)?;

        let key = resolve(&parsed.key_id)
            .ok_or_else(|| bad(format!("unknown key id {}", parsed.key_id)))?;

        let signing_string = signing_string_for(request, &parsed.headers)?;
        verify_pss(
            &key.public_key,
            key.digest,
            key.salt_length,
            signing_string.as_bytes(),
            &parsed.signature,
        )?;

        debug!(key_id = %parsed.key_id, "Verified request signature");
        Ok(parsed.key_id)
    }

    fn check_date(&self, x_date: &str, now: DateTime<Utc>) -> Result<()> {
        let date = DateTime::parse_from_rfc3339(x_date)
            .map_err(|e| bad(format!("x-date is not ISO 8601: {e}")))?
            .with_timezone(&Utc);
        if (now - date).abs() > self.config.max_skew {
            warn!(%date, %now, "x-date outside allowed skew");
            return Err(bad("x-date too far from server time"));
        }
        Ok(())
    }
}

fn header_value<'a>(request: &'a Request<Vec<u8>>, name: &str) -> Result<&'a str> {
    request
        .headers()
        .get(name)
        .ok_or_else(|| bad(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| bad(format!("{name} header is not visible ASCII")))
}

fn check_body(request: &Request<Vec<u8>>) -> Result<()> {
    let body = request.body();
    if header_value(request, CONTENT_LENGTH)? != body.len().to_string() {
        return Err(bad("content-length does not match body"));
    }
    if header_value(request, X_CONTENT_SHA256)? != content_sha256(body) {
        return Err(bad("x-content-sha256 does not match body"));
    }
    Ok(())
}

/// Rebuild the signing string in the order the client listed its headers.
fn signing_string_for(request: &Request<Vec<u8>>, names: &[String]) -> Result<String> {
    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let value = if name == REQUEST_TARGET {
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            request_target(request.method().as_str(), path)
        } else {
            header_value(request, name)?.to_string()
        };
        lines.push(format!("{name}: {value}"));
    }
    Ok(lines.join("\n"))
}
