//! Anti-forgery tokens bound to sessions.
//!
//! A token is the BLAKE3 keyed hash of the session identifier under a key
//! derived from the server's session secret. It is stable for the life of
//! the session, cannot be computed without the secret, and is useless with
//! any other session.

use std::collections::HashMap;
use std::fmt;

use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_TYPE, Method},
};
use futures_util::future::FutureExt;
use thiserror::Error;

use crate::error::PipelineError;
use crate::pipeline::{Outcome, PipelineContext, Stage, StageFuture};
use crate::session::{SessionHandle, SessionId};

/// Form, JSON or query field carrying the token.
pub const CSRF_FIELD: &str = "_csrf";

/// Headers accepted as token carriers, in lookup order.
pub const CSRF_HEADERS: [&str; 4] = ["csrf-token", "xsrf-token", "x-csrf-token", "x-xsrf-token"];

const KEY_CONTEXT: &str = "web-shield v1 session-bound csrf token";

/// CSRF settings.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Validate state-changing requests.
    pub enabled: bool,
    /// Largest body buffered while looking for the token field.
    pub body_limit: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            body_limit: 100 * 1024,
        }
    }
}

/// Token rendered into forms and expected back on state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a token was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfError {
    #[error("no valid session")]
    InvalidSession,
    #[error("token missing")]
    MissingToken,
    #[error("token not bound to this session")]
    Mismatch,
}

/// Issues and checks session-bound tokens.
pub struct CsrfManager {
    key: [u8; 32],
    config: CsrfConfig,
}

impl CsrfManager {
    pub fn new(secret: &str, config: CsrfConfig) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            config,
        }
    }

    /// Token for a session.
    pub fn token_for(&self, session: &SessionId) -> CsrfToken {
        CsrfToken(self.digest(session).to_hex().to_string())
    }

    /// Check a submitted token against the session it arrived with.
    pub fn validate(
        &self,
        session: Option<&SessionHandle>,
        submitted: Option<&str>,
    ) -> Result<(), CsrfError> {
        let session = session
            .filter(|s| s.is_valid())
            .ok_or(CsrfError::InvalidSession)?;

        let submitted = submitted
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::MissingToken)?;

        let presented = blake3::Hash::from_hex(submitted).map_err(|_| CsrfError::Mismatch)?;

        // blake3::Hash equality is constant-time.
        if presented == self.digest(&session.id()) {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }

    fn digest(&self, session: &SessionId) -> blake3::Hash {
        blake3::keyed_hash(&self.key, session.as_bytes())
    }

    async fn check(&self, request: &mut Request, ctx: &mut PipelineContext) -> Outcome {
        if !self.config.enabled {
            return Outcome::Continue;
        }

        if let Some(session) = &ctx.session {
            ctx.csrf_token = Some(self.token_for(&session.id()));
        }

        if !is_state_changing(request.method()) {
            return Outcome::Continue;
        }

        let submitted = match submitted_token(request, self.config.body_limit).await {
            Ok(token) => token,
            Err(err) => return Outcome::Fail(err),
        };

        match self.validate(ctx.session.as_ref(), submitted.as_deref()) {
            Ok(()) => Outcome::Continue,
            Err(reason) => Outcome::Fail(PipelineError::csrf(reason.to_string())),
        }
    }
}

impl Stage for CsrfManager {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a> {
        self.check(request, ctx).boxed()
    }
}

/// Methods that never need a token.
pub fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Find the token a client submitted: body field, then query, then headers.
///
/// The body is buffered and put back so the handler still sees it.
async fn submitted_token(
    request: &mut Request,
    limit: usize,
) -> Result<Option<String>, PipelineError> {
    if let Some(token) = token_from_body(request, limit).await? {
        return Ok(Some(token));
    }

    let from_query = request
        .uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str::<HashMap<String, String>>(q).ok())
        .and_then(|mut fields| fields.remove(CSRF_FIELD));
    if from_query.is_some() {
        return Ok(from_query);
    }

    Ok(CSRF_HEADERS.iter().find_map(|name| {
        request
            .headers()
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }))
}

#[derive(Clone, Copy)]
enum BodyFormat {
    Form,
    Json,
}

async fn token_from_body(
    request: &mut Request,
    limit: usize,
) -> Result<Option<String>, PipelineError> {
    let format = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim();
            if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
                Some(BodyFormat::Form)
            } else if mime.eq_ignore_ascii_case("application/json") {
                Some(BodyFormat::Json)
            } else {
                None
            }
        });

    let Some(format) = format else {
        return Ok(None);
    };

    let body = std::mem::take(request.body_mut());
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| PipelineError::payload_too_large("csrf").with_detail(e.to_string()))?;

    let token = match format {
        BodyFormat::Form => serde_urlencoded::from_bytes::<HashMap<String, String>>(&bytes)
            .ok()
            .and_then(|mut fields| fields.remove(CSRF_FIELD)),
        BodyFormat::Json => serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v.get(CSRF_FIELD).and_then(|t| t.as_str()).map(str::to_string)),
    };

    *request.body_mut() = Body::from(bytes);
    Ok(token)
}
