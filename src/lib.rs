//! # web-shield
//!
//! Layered request defenses in front of a small web application.
//!
//! Every request walks an explicit, ordered pipeline before it reaches a
//! route handler:
//!
//! 1. **Rate limiter**: per-client fixed window, `429` when exhausted
//! 2. **Origin guard**: cross-origin allow-list; hardening headers on every response
//! 3. **API key gate**: shared-secret header on the machine-to-machine prefix
//! 4. **Session store**: server-side sessions keyed by a random cookie
//! 5. **CSRF manager**: session-bound tokens on state-changing requests
//!
//! Failures converge on a single error funnel that picks the status and body.
//!
//! ## Quick Start
//!
//! ```no_run
//! use web_shield::api::{serve, ServerConfig};
//! use web_shield::security::SecurityConfig;
//!
//! #[tokio::main]
//! async fn main() -> web_shield::Result<()> {
//!     web_shield::logging::try_init().ok();
//!
//!     let config = ServerConfig::default()
//!         .with_security(SecurityConfig::new("session-secret").with_api_key("api-key"));
//!     serve(config).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod funnel;
pub mod logging;
pub mod pipeline;
pub mod security;
pub mod session;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use credentials::{CredentialStore, InMemoryCredentialStore, LoginQuery};
pub use error::{ErrorKind, PipelineError, Result, ShieldError};
pub use pipeline::{Outcome, Pipeline, PipelineContext, Stage};
pub use session::{SessionConfig, SessionHandle, SessionId, SessionStore};
