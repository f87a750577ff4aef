//! Origin restriction and transport-security headers.
//!
//! Two halves: a fixed header set attached to every response by the router
//! (see [`SecurityHeaders`]), and the [`OriginGuard`] stage that turns away
//! cross-origin requests from origins or with methods outside the
//! allow-list. The guard only looks at the declared origin and method,
//! never at content.

use axum::{
    extract::Request,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, HOST, ORIGIN, VARY,
        },
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
};
use futures_util::future::{self, FutureExt};

use crate::pipeline::{Outcome, PipelineContext, Stage, StageFuture};

/// Content-Security-Policy sent with every response.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; base-uri 'self'; \
font-src 'self' https: data:; form-action 'self'; frame-ancestors 'self'; \
img-src 'self' data:; object-src 'none'; script-src 'self'; script-src-attr 'none'; \
style-src 'self' https: 'unsafe-inline'; upgrade-insecure-requests";

/// Transport-security header settings.
#[derive(Debug, Clone)]
pub struct HstsConfig {
    pub max_age_secs: u64,
    pub include_subdomains: bool,
    pub preload: bool,
}

impl Default for HstsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 31_536_000,
            include_subdomains: true,
            preload: true,
        }
    }
}

impl HstsConfig {
    pub fn header_value(&self) -> String {
        let mut value = format!("max-age={}", self.max_age_secs);
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }
}

/// The hardening headers attached to every response.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(hsts: &HstsConfig) -> Self {
        let fixed = [
            ("content-security-policy", CONTENT_SECURITY_POLICY),
            ("cross-origin-opener-policy", "same-origin"),
            ("cross-origin-resource-policy", "same-origin"),
            ("origin-agent-cluster", "?1"),
            ("referrer-policy", "no-referrer"),
            ("x-content-type-options", "nosniff"),
            ("x-dns-prefetch-control", "off"),
            ("x-download-options", "noopen"),
            ("x-frame-options", "SAMEORIGIN"),
            ("x-permitted-cross-domain-policies", "none"),
            ("x-xss-protection", "0"),
        ];

        let mut headers: Vec<(HeaderName, HeaderValue)> = fixed
            .into_iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();

        if let Ok(value) = HeaderValue::from_str(&hsts.header_value()) {
            headers.push((HeaderName::from_static("strict-transport-security"), value));
        }

        Self { headers }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.headers.iter()
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new(&HstsConfig::default())
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    /// Origins allowed to make credentialed cross-origin requests.
    pub allowed_origins: Vec<String>,
    /// Methods allowed cross-origin.
    pub allowed_methods: Vec<Method>,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_methods: vec![Method::GET, Method::POST],
        }
    }
}

/// Stage enforcing the [`OriginPolicy`].
#[derive(Debug, Clone)]
pub struct OriginGuard {
    policy: OriginPolicy,
    methods_header: HeaderValue,
}

impl OriginGuard {
    pub fn new(mut policy: OriginPolicy) -> Self {
        for origin in policy.allowed_origins.iter_mut() {
            *origin = normalize_origin(origin);
        }

        let methods = policy
            .allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");

        Self {
            methods_header: HeaderValue::from_str(&methods)
                .unwrap_or_else(|_| HeaderValue::from_static("GET,POST")),
            policy,
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        let origin = normalize_origin(origin);
        self.policy.allowed_origins.iter().any(|o| *o == origin)
    }

    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.policy.allowed_methods.contains(method)
    }

    fn check(&self, request: &Request, ctx: &mut PipelineContext) -> Outcome {
        let Some(origin) = request.headers().get(ORIGIN) else {
            return Outcome::Continue;
        };

        let Ok(origin_str) = origin.to_str() else {
            return deny("malformed origin", "?");
        };

        if is_same_origin(origin_str, request) {
            return Outcome::Continue;
        }

        if !self.is_origin_allowed(origin_str) {
            return deny("origin not in allow-list", origin_str);
        }

        // Preflight
        if request.method() == Method::OPTIONS {
            if let Some(requested) = request.headers().get(ACCESS_CONTROL_REQUEST_METHOD) {
                let allowed = requested
                    .to_str()
                    .ok()
                    .and_then(|m| m.parse::<Method>().ok())
                    .is_some_and(|m| self.is_method_allowed(&m));

                if !allowed {
                    return deny("preflight method not allowed", origin_str);
                }

                ctx.cors_origin = Some(origin.clone());
                return Outcome::Respond(self.preflight_response(request));
            }
        }

        if !self.is_method_allowed(request.method()) {
            return deny("method not allowed cross-origin", origin_str);
        }

        ctx.cors_origin = Some(origin.clone());
        Outcome::Continue
    }

    fn preflight_response(&self, request: &Request) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.methods_header.clone());
        if let Some(requested) = request.headers().get(ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
        response
    }
}

impl Default for OriginGuard {
    fn default() -> Self {
        Self::new(OriginPolicy::default())
    }
}

impl Stage for OriginGuard {
    fn name(&self) -> &'static str {
        "origin"
    }

    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a> {
        future::ready(self.check(request, ctx)).boxed()
    }
}

/// CORS headers for an allowed cross-origin response.
pub fn apply_cors_headers(response: &mut Response, origin: HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

fn deny(reason: &'static str, origin: &str) -> Outcome {
    tracing::warn!(stage = "origin", origin, reason, "cross-origin request rejected");
    Outcome::Respond((StatusCode::FORBIDDEN, "Origin not allowed").into_response())
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Browsers send `Origin` on same-origin POSTs too; compare it to `Host`.
fn is_same_origin(origin: &str, request: &Request) -> bool {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));

    let authority = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin);

    host.is_some_and(|host| host.eq_ignore_ascii_case(authority.trim_end_matches('/')))
}
