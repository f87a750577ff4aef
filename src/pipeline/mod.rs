//! The request defense pipeline.
//!
//! An explicit, ordered list of [`Stage`]s that every request walks before
//! it reaches a handler. Each stage either lets the request continue or
//! ends it with a terminal outcome; the runner stops at the first terminal
//! outcome, so the order in [`Pipeline::standard`] is the whole story of
//! which check can pre-empt which.
//!
//! Stages share per-request state through a [`PipelineContext`]. Once the
//! stages are done, the resolved session and CSRF token are handed to
//! handlers as request extensions, and the context decorates whatever
//! response comes back (session cookie, CORS, rate-limit headers).

mod session;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, Extensions, HeaderValue},
    middleware::Next,
    response::Response,
};
use futures_util::future::BoxFuture;
use rand::RngCore;
use tracing::Instrument;

use crate::error::PipelineError;
use crate::funnel;
use crate::security::{
    apply_cors_headers, ApiKeyGate, ClientIdentity, CsrfManager, CsrfToken, OriginGuard,
    RateLimiter, SecurityConfig,
};
use crate::session::{SessionHandle, SessionStore};

pub use session::SessionStage;

/// Future returned by [`Stage::handle`].
pub type StageFuture<'a> = BoxFuture<'a, Outcome>;

/// One check or enrichment step.
pub trait Stage: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect (and possibly enrich) the request.
    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a>;
}

/// What a stage decided.
pub enum Outcome {
    /// Run the next stage.
    Continue,
    /// Skip the remaining stages and route the request.
    Dispatch,
    /// Answer directly; the error funnel is not involved.
    Respond(Response),
    /// Fail the request through the error funnel.
    Fail(PipelineError),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Dispatch => f.write_str("Dispatch"),
            Self::Respond(r) => write!(f, "Respond({})", r.status()),
            Self::Fail(e) => write!(f, "Fail({})", e),
        }
    }
}

/// Rate-limit accounting reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
}

/// Cross-cutting state of one request.
#[derive(Debug, Default)]
pub struct PipelineContext {
    /// Who the request is accounted to.
    pub identity: ClientIdentity,
    /// Session resolved for this request.
    pub session: Option<SessionHandle>,
    /// Anti-forgery token for responses rendered in this session.
    pub csrf_token: Option<CsrfToken>,
    /// `Set-Cookie` value to attach to the response.
    pub set_cookie: Option<HeaderValue>,
    /// Allowed cross-origin caller to echo back.
    pub cors_origin: Option<HeaderValue>,
    /// Rate-limit headers.
    pub rate_limit: Option<RateLimitInfo>,
}

impl PipelineContext {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    /// Make session and token available to handlers.
    pub fn expose(&self, extensions: &mut Extensions) {
        if let Some(session) = &self.session {
            extensions.insert(session.clone());
        }
        if let Some(token) = &self.csrf_token {
            extensions.insert(token.clone());
        }
    }

    /// Attach the response-side effects of the stages.
    pub fn decorate(self, mut response: Response) -> Response {
        if let Some(cookie) = self.set_cookie {
            response.headers_mut().append(SET_COOKIE, cookie);
        }

        if let Some(origin) = self.cors_origin {
            apply_cors_headers(&mut response, origin);
        }

        if let Some(info) = self.rate_limit {
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
        }

        response
    }
}

/// How the run ended.
pub enum Verdict {
    /// All stages passed; route the request.
    Proceed,
    /// A stage produced the response.
    Halt(Response),
}

/// Ordered list of stages plus the runner.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    trust_proxy: bool,
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new(trust_proxy: bool) -> Self {
        Self {
            stages: Vec::new(),
            trust_proxy,
        }
    }

    /// The production ordering: rate limit, origin, API key, session, CSRF.
    ///
    /// The API key gate sits before session handling so machine clients
    /// on the protected prefix never get a session or a CSRF check.
    pub fn standard(security: &SecurityConfig, sessions: Arc<SessionStore>) -> Self {
        let secret = if security.session_secret.is_empty() {
            tracing::warn!(
                "no session secret configured; generated a random one for this process"
            );
            ephemeral_secret()
        } else {
            security.session_secret.clone()
        };

        Self::new(security.trust_proxy)
            .with_stage(RateLimiter::new(security.rate_limit.clone()))
            .with_stage(OriginGuard::new(security.origin.clone()))
            .with_stage(ApiKeyGate::new(&security.api_key))
            .with_stage(SessionStage::new(sessions))
            .with_stage(CsrfManager::new(&secret, security.csrf.clone()))
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Names of the stages in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn trust_proxy(&self) -> bool {
        self.trust_proxy
    }

    /// Run the stages until one of them ends the request.
    pub async fn run(&self, request: &mut Request, ctx: &mut PipelineContext) -> Verdict {
        for stage in &self.stages {
            match stage.handle(request, ctx).await {
                Outcome::Continue => continue,
                Outcome::Dispatch => {
                    tracing::debug!(stage = stage.name(), "remaining stages skipped");
                    return Verdict::Proceed;
                }
                Outcome::Respond(response) => {
                    tracing::debug!(stage = stage.name(), status = %response.status(), "stage answered");
                    return Verdict::Halt(response);
                }
                Outcome::Fail(err) => return Verdict::Halt(funnel::render(&err)),
            }
        }
        Verdict::Proceed
    }
}

/// Random hex secret that lives as long as the process.
fn ephemeral_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Axum middleware driving the pipeline.
pub async fn pipeline_middleware(
    State(pipeline): State<Arc<Pipeline>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = ClientIdentity::from_request(&request, pipeline.trust_proxy());
    let span = tracing::info_span!(
        "pipeline",
        %identity,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let mut ctx = PipelineContext::new(identity);

        let response = match pipeline.run(&mut request, &mut ctx).await {
            Verdict::Proceed => {
                ctx.expose(request.extensions_mut());
                next.run(request).await
            }
            Verdict::Halt(response) => response,
        };

        ctx.decorate(response)
    }
    .instrument(span)
    .await
}
