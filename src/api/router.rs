//! API router configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use super::handlers::{csp_test, health, index, login, secure_data, AppState};
use crate::funnel;
use crate::pipeline::pipeline_middleware;
use crate::security::SecurityConfig;
use crate::session::SessionConfig;

/// Create the router with default settings and no users.
pub fn create_router() -> Router {
    create_router_with_state(AppState::new(&ServerConfig::default()))
}

/// Create the router around prepared state.
///
/// Layering, outermost first: tracing, hardening headers, the defense
/// pipeline, panic capture, then routing. Unmatched paths, and known paths
/// hit with the wrong method, still walk the whole pipeline before the
/// fallback answers 404.
pub fn create_router_with_state(state: AppState) -> Router {
    let secure_path = format!("{}/data", state.api_prefix.trim_end_matches('/'));

    let mut router = Router::new()
        .route("/", get(index))
        .route("/csp-test", get(csp_test))
        .route("/login", post(login))
        .route("/health", get(health))
        .route(&secure_path, get(secure_data))
        .fallback(funnel::not_found)
        .method_not_allowed_fallback(funnel::not_found)
        .layer(CatchPanicLayer::custom(funnel::render_panic))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.pipeline),
            pipeline_middleware,
        ));

    for (name, value) in state.headers.iter() {
        router = router.layer(SetResponseHeaderLayer::overriding(
            name.clone(),
            value.clone(),
        ));
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Stop on Ctrl-C after draining in-flight requests.
    pub graceful_shutdown: bool,
    pub security: SecurityConfig,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Start the server with default state.
pub async fn serve(config: ServerConfig) -> crate::Result<()> {
    let state = AppState::new(&config);
    serve_with_state(config, state).await
}

/// Start the server with custom state.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let router = create_router_with_state(state);

    tracing::info!("Starting web-shield server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::error::ShieldError::Io)?;

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, service);

    let result = if config.graceful_shutdown {
        server.with_graceful_shutdown(shutdown_signal()).await
    } else {
        server.await
    };

    result.map_err(|e| crate::error::ShieldError::Server(e.to_string()))?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!("failed to listen for shutdown signal: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 8080).without_graceful_shutdown();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(!config.graceful_shutdown);
    }

    #[tokio::test]
    async fn test_health_has_hardening_headers() {
        let response = create_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().contains_key("content-security-policy"));
        assert!(response.headers().contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn test_custom_api_prefix() {
        let mut config = ServerConfig::default();
        config.security = SecurityConfig::new("secret").with_api_key("k");
        config.security.api_key.path_prefix = "/machine/".to_string();

        let router = create_router_with_state(AppState::new(&config));
        let response = router
            .oneshot(
                Request::get("/machine/data")
                    .header("x-api-key", "k")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
