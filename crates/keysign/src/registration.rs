//! Shapes exchanged with the login endpoint. The login call itself is made
//! by the transport layer and is never signed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::PublicJwk;

/// Credentials plus the public key to register.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub public_key: PublicJwk,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Identity the server issued for the submitted public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub key_id: String,
    pub valid_until: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let request = LoginRequest {
            username: "alice".into(),
            password: "hunter2".into(),
            public_key: PublicJwk {
                kty: "RSA".into(),
                n: "AQAB".into(),
                e: "AQAB".into(),
            },
        };
        let rendered = format!("{request:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn response_reads_iso8601_expiry() {
        let response: LoginResponse =
            serde_json::from_str(r#"{"key_id": "k1", "valid_until": "2030-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(response.key_id, "k1");
        assert_eq!(response.valid_until.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }
}
