//! API key gate for the machine-to-machine sub-path.

use axum::{extract::Request, http::HeaderName};
use futures_util::future::{self, FutureExt};

use crate::error::PipelineError;
use crate::pipeline::{Outcome, PipelineContext, Stage, StageFuture};

/// API key gate configuration.
#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    /// Path prefix the gate protects.
    pub path_prefix: String,
    /// Header carrying the key.
    pub header_name: String,
    /// Shared secret. `None` refuses every request on the prefix.
    pub key: Option<String>,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/secure-api".to_string(),
            header_name: "x-api-key".to_string(),
            key: None,
        }
    }
}

impl ApiKeyConfig {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }
}

/// Gate in front of the API-key-protected routes.
///
/// Only a digest of the secret is held. Presented keys are hashed and the
/// digests compared in constant time, so the comparison leaks neither
/// where the first differing byte is nor the secret's length.
#[derive(Debug, Clone)]
pub struct ApiKeyGate {
    prefix: String,
    header: HeaderName,
    expected: Option<blake3::Hash>,
}

impl ApiKeyGate {
    pub fn new(config: &ApiKeyConfig) -> Self {
        let header = HeaderName::try_from(config.header_name.as_str())
            .unwrap_or_else(|_| HeaderName::from_static("x-api-key"));

        let expected = config
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| blake3::hash(k.as_bytes()));

        if expected.is_none() {
            tracing::warn!(
                prefix = %config.path_prefix,
                "no API key configured; every request to the protected path will be refused"
            );
        }

        Self {
            prefix: config.path_prefix.trim_end_matches('/').to_string(),
            header,
            expected,
        }
    }

    /// Whether the gate applies to this path.
    pub fn protects(&self, path: &str) -> bool {
        path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Compare a presented key with the configured one.
    pub fn verify(&self, presented: Option<&[u8]>) -> bool {
        match (self.expected, presented) {
            (Some(expected), Some(key)) => blake3::hash(key) == expected,
            _ => false,
        }
    }

    fn check(&self, request: &Request) -> Outcome {
        if !self.protects(request.uri().path()) {
            return Outcome::Continue;
        }

        let presented = request.headers().get(&self.header).map(|v| v.as_bytes());
        if self.verify(presented) {
            // Machine clients skip the browser session and CSRF stages.
            Outcome::Dispatch
        } else {
            let reason = if presented.is_some() { "invalid" } else { "missing" };
            Outcome::Fail(PipelineError::api_key_invalid().with_detail(format!("key {}", reason)))
        }
    }
}

impl Stage for ApiKeyGate {
    fn name(&self) -> &'static str {
        "api_key"
    }

    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        _ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a> {
        future::ready(self.check(request)).boxed()
    }
}
