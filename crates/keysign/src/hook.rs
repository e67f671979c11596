//! Attaches signature headers to outgoing requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request};
use tracing::debug;

use crate::canonical::SignableRequest;
use crate::config::HookConfig;
use crate::error::Result;
use crate::signer::RequestSigner;

pub struct SigningHook {
    signer: Arc<dyn RequestSigner>,
    config: HookConfig,
}

impl SigningHook {
    pub fn new(signer: Arc<dyn RequestSigner>, config: HookConfig) -> Self {
        Self { signer, config }
    }

    /// Everything is signed except `POST` to the login endpoint.
    pub fn should_sign(&self, method: &Method, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        !(method == Method::POST && path == self.config.login_path)
    }

    /// Sign `request` in place, stamped with the current time. Returns
    /// whether headers were attached.
    pub fn apply(&self, request: &mut Request<Vec<u8>>) -> Result<bool> {
        self.apply_at(request, Utc::now())
    }

    pub fn apply_at(&self, request: &mut Request<Vec<u8>>, now: DateTime<Utc>) -> Result<bool> {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        if !self.should_sign(request.method(), &path) {
            debug!(%path, "Skipping signature for login request");
            return Ok(false);
        }

        let signable = SignableRequest::new(
            request.method().as_str(),
            path,
            request.body().clone(),
            now,
        );
        let headers = self.signer.sign_request(&signable)?;

        let target = request.headers_mut();
        for (name, value) in headers.iter() {
            target.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }
        Ok(true)
    }
}
