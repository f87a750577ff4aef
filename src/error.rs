//! Error types for web-shield.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for web-shield operations.
#[derive(Error, Debug)]
pub enum ShieldError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The external credential store failed.
    #[error("credential store error: {0}")]
    CredentialStore(String),

    /// Session identifier could not be parsed.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// HTTP server error.
    #[error("server error: {0}")]
    Server(String),
}

/// Convenience Result type for web-shield operations.
pub type Result<T> = std::result::Result<T, ShieldError>;

/// Classification of a failure raised by a pipeline stage or a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client exceeded its request budget for the current window.
    RateLimitExceeded,
    /// State-changing request without a token bound to its session.
    CsrfValidationFailed,
    /// Protected sub-path reached without the right API key.
    ApiKeyInvalid,
    /// No route claimed the request.
    RouteNotFound,
    /// Body too large to buffer while looking for a token.
    PayloadTooLarge,
    /// Body a handler could not decode.
    MalformedRequest,
    /// Anything else. Details stay in the logs.
    Unclassified,
}

impl ErrorKind {
    /// Status code used when the error carries none of its own.
    pub fn default_status(&self) -> Option<StatusCode> {
        match self {
            Self::RateLimitExceeded => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::CsrfValidationFailed => Some(StatusCode::FORBIDDEN),
            Self::ApiKeyInvalid => Some(StatusCode::UNAUTHORIZED),
            Self::RouteNotFound => Some(StatusCode::NOT_FOUND),
            Self::PayloadTooLarge => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::MalformedRequest => Some(StatusCode::BAD_REQUEST),
            Self::Unclassified => None,
        }
    }
}

/// A terminal failure produced by any stage, consumed by the error funnel.
#[derive(Error, Debug, Clone)]
#[error("{stage}: {message}")]
pub struct PipelineError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Status to render. `None` renders as 500.
    pub status: Option<StatusCode>,
    /// Stage (or handler) that raised the error.
    pub stage: &'static str,
    /// Client-facing message.
    pub message: String,
    /// Internal detail, logged but never sent to the client.
    pub detail: Option<String>,
    /// Hint for `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            stage,
            message: message.into(),
            detail: None,
            retry_after: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(ErrorKind::RateLimitExceeded, "rate_limit", message)
        }
    }

    pub fn csrf(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CsrfValidationFailed,
            "csrf",
            crate::funnel::CSRF_FAILURE_MESSAGE,
        )
        .with_detail(detail)
    }

    pub fn api_key_invalid() -> Self {
        Self::new(
            ErrorKind::ApiKeyInvalid,
            "api_key",
            "Unauthorized: Invalid or missing API key.",
        )
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::RouteNotFound, "router", "Page not found")
    }

    pub fn payload_too_large(stage: &'static str) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, stage, "Payload Too Large")
    }

    /// Undecodable body; the client only sees the status reason.
    pub fn malformed(stage: &'static str, status: StatusCode, detail: impl Into<String>) -> Self {
        let reason = status.canonical_reason().unwrap_or("Bad Request");
        Self::new(ErrorKind::MalformedRequest, stage, reason)
            .with_status(status)
            .with_detail(detail)
    }

    pub fn internal(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, stage, "Internal Server Error").with_detail(detail)
    }

    /// Status the funnel will render.
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<ShieldError> for PipelineError {
    fn from(err: ShieldError) -> Self {
        Self::internal("handler", err.to_string())
    }
}
