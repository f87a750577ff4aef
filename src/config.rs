//! Configuration management for web-shield.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::credentials::UserEntry;
use crate::security::{ApiKeyConfig, CsrfConfig, RateLimitConfig, SecurityConfig};
use crate::session::SessionConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub security: SecuritySection,
    pub session: SessionSection,
    /// Users accepted by the login route.
    pub users: Vec<UserEntry>,
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
    /// Identify clients by `X-Forwarded-For`.
    pub trust_proxy: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
            trust_proxy: false,
        }
    }
}

/// Security configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub rate_limit: RateLimitSection,
    pub cors: CorsSection,
    pub api_key: ApiKeySection,
    pub csrf: CsrfSection,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Enable rate limiting.
    pub enabled: bool,
    /// Requests per window.
    pub max_requests: u32,
    /// Window size in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSection {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
        }
    }
}

/// API key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeySection {
    /// Shared secret; absent means the protected path refuses everything.
    pub key: Option<String>,
    pub header: String,
    pub path_prefix: String,
}

impl Default for ApiKeySection {
    fn default() -> Self {
        let defaults = ApiKeyConfig::default();
        Self {
            key: None,
            header: defaults.header_name,
            path_prefix: defaults.path_prefix,
        }
    }
}

/// CSRF configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfSection {
    pub enabled: bool,
}

impl Default for CsrfSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Secret the anti-forgery key is derived from.
    pub secret: Option<String>,
    pub cookie_name: String,
    pub idle_timeout_secs: u64,
    pub secure_cookie: bool,
    /// Refresh the idle timeout on every request.
    pub rolling: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: "sid".to_string(),
            idle_timeout_secs: 30 * 60,
            secure_cookie: false,
            rolling: true,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("WEB_SHIELD_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("WEB_SHIELD_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(key) = var("WEB_SHIELD_API_KEY").filter(|k| !k.is_empty()) {
            self.security.api_key.key = Some(key);
        }

        if let Some(secret) = var("WEB_SHIELD_SESSION_SECRET").filter(|s| !s.is_empty()) {
            self.session.secret = Some(secret);
        }

        if let Some(origins) = var("WEB_SHIELD_ALLOWED_ORIGINS") {
            self.security.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(level) = var("WEB_SHIELD_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref key) = args.api_key {
            self.security.api_key.key = Some(key.clone());
        }

        if let Some(ref secret) = args.session_secret {
            self.session.secret = Some(secret.clone());
        }

        if !args.allowed_origins.is_empty() {
            self.security.cors.allowed_origins = args.allowed_origins.clone();
        }

        if args.trust_proxy {
            self.server.trust_proxy = true;
        }

        if args.no_rate_limit {
            self.security.rate_limit.enabled = false;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to the immutable server settings.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let methods = self
            .security
            .cors
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // An empty secret makes the pipeline generate a per-process one.
        let secret = self.session.secret.clone().unwrap_or_default();

        let rate = &self.security.rate_limit;
        let mut security = SecurityConfig::new(secret)
            .with_rate_limit(RateLimitConfig {
                enabled: rate.enabled,
                max_requests: rate.max_requests,
                window: Duration::from_secs(rate.window_secs),
                ..RateLimitConfig::default()
            })
            .with_allowed_origins(self.security.cors.allowed_origins.clone());

        security.origin.allowed_methods = methods;
        security.api_key = ApiKeyConfig {
            path_prefix: self.security.api_key.path_prefix.clone(),
            header_name: self.security.api_key.header.to_ascii_lowercase(),
            key: self.security.api_key.key.clone(),
        };
        security.csrf = CsrfConfig {
            enabled: self.security.csrf.enabled,
            ..CsrfConfig::default()
        };
        security.trust_proxy = self.server.trust_proxy;

        let session = SessionConfig {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            rolling: self.session.rolling,
            cookie_name: self.session.cookie_name.clone(),
            secure_cookie: self.session.secure_cookie,
        };

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port)
            .with_security(security)
            .with_session(session);

        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Filter directive for the logging layer.
    ///
    /// A bare level scopes to this crate; anything else is used verbatim.
    pub fn log_filter(&self) -> String {
        let level = self.logging.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("web_shield={},tower_http={}", level, level)
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Unknown HTTP method in the CORS section.
    InvalidMethod(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidMethod(method) => write!(f, "invalid HTTP method: {}", method),
        }
    }
}

impl std::error::Error for ConfigError {}
