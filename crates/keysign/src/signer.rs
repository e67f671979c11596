use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::rand_core::{CryptoRngCore, OsRng};
use tracing::{debug, warn};

use crate::canonical::{
    CONTENT_LENGTH, MINIMUM_HEADERS, SignableRequest, X_CONTENT_SHA256, X_DATE, build_header_set,
    to_signing_string,
};
use crate::error::{KeysignError, Result};
use crate::keys::{KeyPair, KeyState};

pub const AUTHORIZATION: &str = "authorization";

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub x_date: String,
    pub content_length: String,
    pub x_content_sha256: String,
    pub authorization: String,
    /// Additional signed headers, in signing order.
    pub extra: Vec<(String, String)>,
}

impl SignatureHeaders {
    /// Name/value pairs in attach order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        [
            (X_DATE, self.x_date.as_str()),
            (CONTENT_LENGTH, self.content_length.as_str()),
            (X_CONTENT_SHA256, self.x_content_sha256.as_str()),
            (AUTHORIZATION, self.authorization.as_str()),
        ]
        .into_iter()
        .chain(self.extra.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }
}

/// Anything that can sign an outgoing request.
///
/// Implementations are sync: signing is CPU-bound and touches no storage.
pub trait RequestSigner: Send + Sync {
    fn sign_request(&self, request: &SignableRequest) -> Result<SignatureHeaders>;
}

/// Sign `request` with `key`, checked against the request's own timestamp.
///
/// Fails before producing any header when the key is absent, unregistered or
/// expired.
pub fn sign(key: Option<&KeyPair>, request: &SignableRequest) -> Result<SignatureHeaders> {
    sign_with_rng(key, request, &mut OsRng)
}

pub fn sign_with_rng<R: CryptoRngCore>(
    key: Option<&KeyPair>,
    request: &SignableRequest,
    rng: &mut R,
) -> Result<SignatureHeaders> {
    let key = key.ok_or_else(|| {
        warn!("key is missing");
        KeysignError::MissingPrivateKey
    })?;
    let registration = match key.state(request.timestamp()) {
        KeyState::Local => {
            warn!("expiry or key id is missing");
            return Err(KeysignError::UnregisteredKey);
        }
        KeyState::Expired => {
            let valid_until = key.valid_until().ok_or(KeysignError::UnregisteredKey)?;
            warn!(%valid_until, "expired key");
            return Err(KeysignError::ExpiredKey { valid_until });
        }
        KeyState::Registered => key.registration().ok_or(KeysignError::UnregisteredKey)?,
    };

    let header_set = build_header_set(request);
    let signing_string = to_signing_string(&header_set);
    let signature = key.sign_pss_with_rng(rng, signing_string.as_bytes())?;

    let header_list = header_set.header_list();
    debug!(headers = %header_list, key_id = %registration.key_id, "Signed request");

    let authorization = format!(
        r#"Signature headers="{}" id="{}" signature="{}""#,
        header_list,
        registration.key_id,
        STANDARD.encode(signature)
    );

    let fixed = |name: &str| header_set.get(name).unwrap_or_default().to_string();
    Ok(SignatureHeaders {
        x_date: fixed(X_DATE),
        content_length: fixed(CONTENT_LENGTH),
        x_content_sha256: fixed(X_CONTENT_SHA256),
        authorization,
        extra: header_set
            .iter()
            .skip(MINIMUM_HEADERS.len())
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generator::tests::seeded_key;
    use crate::keys::verify_pss;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn registered_key(seed: &str, key_id: &str, valid_until: DateTime<Utc>) -> KeyPair {
        let mut key = seeded_key(seed);
        key.register(key_id, valid_until);
        key
    }

    fn signature_of(authorization: &str) -> Vec<u8> {
        let encoded = authorization
            .split("signature=\"")
            .nth(1)
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap();
        STANDARD.decode(encoded).unwrap()
    }

    #[test]
    fn missing_key_fails() {
        let request = SignableRequest::new("GET", "/keys", "", t());
        assert!(matches!(
            sign(None, &request).unwrap_err(),
            KeysignError::MissingPrivateKey
        ));
    }

    #[test]
    fn local_key_is_unregistered() {
        let key = seeded_key("signer-local");
        let request = SignableRequest::new("GET", "/keys", "", t());
        assert!(matches!(
            sign(Some(&key), &request).unwrap_err(),
            KeysignError::UnregisteredKey
        ));
    }

    #[test]
    fn expired_key_fails() {
        let key = registered_key("signer-expired", "k1", t() - Duration::hours(1));
        let request = SignableRequest::new("GET", "/keys", "", t());
        let error = sign(Some(&key), &request).unwrap_err();
        assert!(matches!(error, KeysignError::ExpiredKey { valid_until } if valid_until == t() - Duration::hours(1)));
    }

    #[test]
    fn key_usable_one_second_before_expiry_only() {
        let t0 = t();
        let key = registered_key("signer-boundary", "k1", t0);

        let before = SignableRequest::new("GET", "/keys", "", t0 - Duration::seconds(1));
        assert!(sign(Some(&key), &before).is_ok());

        let after = SignableRequest::new("GET", "/keys", "", t0 + Duration::seconds(1));
        assert!(matches!(
            sign(Some(&key), &after).unwrap_err(),
            KeysignError::ExpiredKey { .. }
        ));
    }

    #[test]
    fn authorization_lists_headers_in_canonical_order() {
        let key = registered_key("signer-order", "k1", t() + Duration::hours(1));
        let request = SignableRequest::new("GET", "/keys", "", t());
        let headers = sign(Some(&key), &request).unwrap();

        assert!(headers.authorization.starts_with(
            r#"Signature headers="x-date content-length x-content-sha256 (request-target)" id="k1" signature=""#
        ));
        assert_eq!(headers.x_date, "2030-01-01T00:00:00.000Z");
        assert_eq!(headers.content_length, "0");
        assert_eq!(headers.x_content_sha256, crate::canonical::EMPTY_BODY_SHA256);
        assert!(headers.extra.is_empty());
    }

    #[test]
    fn signature_covers_signing_string() {
        let key = registered_key("signer-covers", "k1", t() + Duration::hours(1));
        let request = SignableRequest::new("POST", "/games?x=1", b"{}".to_vec(), t());
        let headers = sign(Some(&key), &request).unwrap();

        let signing_string = to_signing_string(&build_header_set(&request));
        verify_pss(
            key.public_key(),
            key.digest(),
            key.salt_length(),
            signing_string.as_bytes(),
            &signature_of(&headers.authorization),
        )
        .unwrap();
    }

    #[test]
    fn extra_headers_are_returned_and_listed() {
        let key = registered_key("signer-extra", "k1", t() + Duration::hours(1));
        let request = SignableRequest::new("GET", "/", "", t()).with_header("Host", "api.example.com").unwrap();
        let headers = sign(Some(&key), &request).unwrap();

        assert!(headers.authorization.contains(
            r#"headers="x-date content-length x-content-sha256 (request-target) host""#
        ));
        assert_eq!(headers.extra, vec![("host".to_string(), "api.example.com".to_string())]);
        assert_eq!(headers.iter().count(), 5);
    }

    #[test]
    fn iter_yields_four_headers_in_attach_order() {
        let key = registered_key("signer-iter", "k1", t() + Duration::hours(1));
        let headers = sign(Some(&key), &SignableRequest::new("GET", "/", "", t())).unwrap();
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x-date", "content-length", "x-content-sha256", "authorization"]);
    }
}
