//! Canonical form of a request: the ordered header set and the string that
//! gets signed.
//!
//! The four fixed entries always come first, in this order:
//!
//! ```text
//! x-date: 2030-01-01T00:00:00.000Z
//! content-length: 0
//! x-content-sha256: 47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=
//! (request-target): get /keys
//! ```
//!
//! Extra headers follow in the order they were added. Signer and verifier
//! both derive the `headers=` list from this order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

use crate::error::{KeysignError, Result};

pub const X_DATE: &str = "x-date";
pub const CONTENT_LENGTH: &str = "content-length";
pub const X_CONTENT_SHA256: &str = "x-content-sha256";
pub const REQUEST_TARGET: &str = "(request-target)";

/// Headers every signature must cover.
pub const MINIMUM_HEADERS: [&str; 4] = [X_DATE, CONTENT_LENGTH, X_CONTENT_SHA256, REQUEST_TARGET];

/// Base64 SHA-256 of the empty byte string.
pub const EMPTY_BODY_SHA256: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=";

/// One outgoing request, as far as signing is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignableRequest {
    method: String,
    path: String,
    body: Vec<u8>,
    timestamp: DateTime<Utc>,
    extra_headers: Vec<(String, String)>,
}

impl SignableRequest {
    /// `path` is the path plus query string exactly as it goes on the wire.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: body.into(),
            timestamp,
            extra_headers: Vec::new(),
        }
    }

    /// Request stamped with the current time.
    pub fn now(method: impl Into<String>, path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(method, path, body, Utc::now())
    }

    /// Also sign `name`. Names are compared lowercased; the fixed entries
    /// cannot be overridden. Names must be HTTP tokens and values visible
    /// ASCII, otherwise `InvalidHeader`.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes())?;
        let value = value.into();
        HeaderValue::from_str(&value)?;
        if value.contains('\t') {
            return Err(KeysignError::InvalidHeader(format!("tab in value of {name}")));
        }
        self.extra_headers.push((name.as_str().to_string(), value));
        Ok(self)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn extra_headers(&self) -> &[(String, String)] {
        &self.extra_headers
    }
}

/// Insertion-ordered header name -> value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalHeaderSet {
    entries: Vec<(String, String)>,
}

impl CanonicalHeaderSet {
    /// Appends unless `name` is already present.
    fn push(&mut self, name: &str, value: String) {
        let name = name.to_ascii_lowercase();
        if self.get(&name).is_none() {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Space-joined names, as echoed in `headers="..."`.
    pub fn header_list(&self) -> String {
        self.names().collect::<Vec<_>>().join(" ")
    }
}

/// Build the header set for `request`. Pure: same input, same output.
pub fn build_header_set(request: &SignableRequest) -> CanonicalHeaderSet {
    let mut set = CanonicalHeaderSet::default();
    set.push(X_DATE, format_x_date(request.timestamp));
    set.push(CONTENT_LENGTH, request.body.len().to_string());
    set.push(X_CONTENT_SHA256, content_sha256(&request.body));
    set.push(REQUEST_TARGET, request_target(&request.method, &request.path));
    for (name, value) in &request.extra_headers {
        set.push(name, value.clone());
    }
    set
}

/// `"<name>: <value>"` lines joined by `\n`, no trailing newline.
pub fn to_signing_string(set: &CanonicalHeaderSet) -> String {
    set.iter()
        .map(|(name, value)| format!("{}: {}", name.to_ascii_lowercase(), value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base64 of the SHA-256 digest of `body`.
pub fn content_sha256(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

pub fn request_target(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_lowercase(), path)
}

/// ISO 8601 UTC with millisecond precision, e.g. `2030-01-01T00:00:00.000Z`.
pub fn format_x_date(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
