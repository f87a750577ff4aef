//! Security module for web-shield.
//!
//! The individual defenses that the pipeline strings together.
//!
//! ## Features
//!
//! - **Rate Limiting**: per-client fixed window
//! - **Origin Guard**: cross-origin allow-list plus transport-security headers
//! - **CSRF**: session-bound anti-forgery tokens
//! - **API Key Gate**: shared-secret header for the machine-to-machine sub-path
//!
//! ## Example
//!
//! ```rust
//! use web_shield::security::{ApiKeyConfig, ApiKeyGate, ClientIdentity, RateLimitConfig, RateLimiter};
//!
//! // Three requests per minute
//! let limiter = RateLimiter::new(RateLimitConfig::custom(3, 60));
//! assert!(limiter.admit(ClientIdentity::Unknown).is_allowed());
//!
//! let gate = ApiKeyGate::new(&ApiKeyConfig::with_key("my-secret-key"));
//! assert!(gate.verify(Some(b"my-secret-key")));
//! ```

pub mod api_key;
pub mod csrf;
pub mod origin;
pub mod rate_limit;

// Re-export commonly used types
pub use api_key::{ApiKeyConfig, ApiKeyGate};
pub use csrf::{CsrfConfig, CsrfError, CsrfManager, CsrfToken, CSRF_FIELD, CSRF_HEADERS};
pub use origin::{
    apply_cors_headers, HstsConfig, OriginGuard, OriginPolicy, SecurityHeaders,
    CONTENT_SECURITY_POLICY,
};
pub use rate_limit::{
    Admission, ClientIdentity, RateLimitConfig, RateLimitStats, RateLimiter,
    DEFAULT_RATE_LIMIT_MESSAGE,
};

/// Security settings for the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub rate_limit: RateLimitConfig,
    pub origin: OriginPolicy,
    pub hsts: HstsConfig,
    pub api_key: ApiKeyConfig,
    pub csrf: CsrfConfig,
    /// Secret the CSRF key is derived from.
    pub session_secret: String,
    /// Take the client address from `X-Forwarded-For`.
    pub trust_proxy: bool,
}

impl SecurityConfig {
    /// Production-style settings: everything on.
    pub fn new(session_secret: impl Into<String>) -> Self {
        Self {
            session_secret: session_secret.into(),
            ..Default::default()
        }
    }

    /// Add the API key for the protected sub-path.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key.key = Some(key.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.origin.allowed_origins = origins;
        self
    }
}
