//! Terminal error funnel.
//!
//! Every [`PipelineError`] ends up here, whether a stage raised it, a handler
//! returned it, the router found no match, or a handler panicked. The funnel
//! renders it exactly once with its carried status (500 when it has none)
//! and logs it with the stage that raised it. The identity and timestamp of
//! the request come from the enclosing request span.

use std::any::Any;

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::api::types::ErrorResponse;
use crate::error::{ErrorKind, PipelineError};

/// Fixed user-facing message for anti-forgery failures.
pub const CSRF_FAILURE_MESSAGE: &str = "Form tampered with! CSRF validation failed.";

/// Marker extension set on responses rendered by the funnel.
#[derive(Debug, Clone, Copy)]
pub struct Rendered(pub ErrorKind);

/// Render a pipeline error into the client-visible response.
pub fn render(err: &PipelineError) -> Response {
    let status = err.status_code();

    if status.is_server_error() {
        tracing::error!(
            stage = err.stage,
            kind = ?err.kind,
            status = status.as_u16(),
            detail = err.detail.as_deref().unwrap_or(""),
            "request failed"
        );
    } else {
        tracing::warn!(
            stage = err.stage,
            kind = ?err.kind,
            status = status.as_u16(),
            detail = err.detail.as_deref().unwrap_or(""),
            "request rejected"
        );
    }

    let mut response = match err.kind {
        ErrorKind::CsrfValidationFailed => (status, CSRF_FAILURE_MESSAGE).into_response(),
        ErrorKind::ApiKeyInvalid => (
            status,
            Json(ErrorResponse::new("API_KEY_INVALID", err.message.clone())),
        )
            .into_response(),
        ErrorKind::Unclassified => (status, "Internal Server Error").into_response(),
        _ => (status, err.message.clone()).into_response(),
    };

    if let Some(retry_after) = err.retry_after {
        // Round up so a client never retries before the window closes.
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }

    response.extensions_mut().insert(Rendered(err.kind));
    response
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        render(&self)
    }
}

/// Router fallback: nothing claimed the request.
pub async fn not_found() -> PipelineError {
    PipelineError::not_found()
}

/// Panic handler for `CatchPanicLayer`.
pub fn render_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    render(&PipelineError::internal("handler", detail))
}

/// Whether the funnel already produced this response.
pub fn is_rendered(response: &Response) -> bool {
    response.extensions().get::<Rendered>().is_some()
}
