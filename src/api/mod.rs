//! HTTP surface of web-shield.
//!
//! Every route sits behind the defense pipeline and the hardening headers.
//!
//! ## Endpoints
//!
//! - `GET /` - Login form carrying the session's anti-forgery token
//! - `GET /csp-test` - Page loading a foreign script the CSP must block
//! - `POST /login` - Credential check via parameterized query (CSRF-protected)
//! - `GET /secure-api/data` - Machine route behind the `x-api-key` header
//! - `GET /health` - Health check
//! - anything else - `404 Page not found` through the error funnel
//!
//! ## Example
//!
//! ```no_run
//! use web_shield::api::{serve, ServerConfig};
//! use web_shield::security::SecurityConfig;
//!
//! #[tokio::main]
//! async fn main() -> web_shield::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 3000)
//!         .with_security(SecurityConfig::new("session-secret").with_api_key("api-key"));
//!     serve(config).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use handlers::AppState;
pub use router::{create_router, create_router_with_state, serve, serve_with_state, ServerConfig};
pub use types::{ErrorResponse, LoginForm, SecureDataResponse};
