//! Route handlers.
//!
//! By the time a handler runs, the pipeline has already admitted the
//! request, resolved its session and (for state changes) validated its
//! anti-forgery token.

use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    response::Html,
    Extension, Form, Json,
};

use super::types::{LoginForm, SecureDataResponse};
use crate::credentials::{CredentialStore, InMemoryCredentialStore, LoginQuery};
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::security::{CsrfToken, SecurityHeaders, CSRF_FIELD};
use crate::session::{SessionHandle, SessionStore};

use super::router::ServerConfig;

/// Session key holding the signed-in user.
pub const USERNAME_KEY: &str = "username";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub headers: Arc<SecurityHeaders>,
    /// Mount point of the API-key-protected routes.
    pub api_prefix: String,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_credentials(config, Arc::new(InMemoryCredentialStore::new()))
    }

    pub fn with_credentials(config: &ServerConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session.clone()));
        let pipeline = Pipeline::standard(&config.security, Arc::clone(&sessions));

        tracing::debug!(stages = ?pipeline.stage_names(), "pipeline assembled");

        Self {
            pipeline: Arc::new(pipeline),
            sessions,
            credentials,
            headers: Arc::new(SecurityHeaders::new(&config.security.hsts)),
            api_prefix: config.security.api_key.path_prefix.clone(),
        }
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// Landing page with the login form.
pub async fn index(
    token: Option<Extension<CsrfToken>>,
    session: Option<Extension<SessionHandle>>,
) -> Html<String> {
    let greeting = session
        .and_then(|Extension(s)| s.get(USERNAME_KEY))
        .map(|user| format!("<p>Signed in as {}</p>", escape_html(&user)))
        .unwrap_or_default();

    let hidden = token
        .map(|Extension(t)| {
            format!(
                r#"<input type="hidden" name="{}" value="{}">"#,
                CSRF_FIELD,
                escape_html(t.as_str())
            )
        })
        .unwrap_or_default();

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
  <h1>Sign in</h1>
  {greeting}
  <form method="post" action="/login">
    {hidden}
    <input name="username" autocomplete="username">
    <input name="password" type="password" autocomplete="current-password">
    <button type="submit">Sign in</button>
  </form>
</body>
</html>
"#
    ))
}

/// Page pulling a script from a foreign origin; the CSP must block it.
pub async fn csp_test() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>CSP Test</title></head>
<body>
  <h1>CSP Testing Page</h1>
  <script src="https://evil.com/script.js"></script>
</body>
</html>
"#,
    )
}

/// Check credentials through the parameterized login query.
pub async fn login(
    State(state): State<AppState>,
    session: Option<Extension<SessionHandle>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<&'static str, PipelineError> {
    let Form(form) = form.map_err(|rejection| {
        PipelineError::malformed("login", rejection.status(), rejection.body_text())
    })?;

    let query = LoginQuery::new(form.username.as_str(), form.password.as_str());

    let found = state
        .credentials
        .execute(&query)
        .await
        .map_err(|e| PipelineError::internal("login", e.to_string()))?;

    if !found {
        tracing::info!(username = %form.username, "login failed");
        return Ok("Login failed");
    }

    if let Some(Extension(session)) = session {
        if !session.insert(USERNAME_KEY, form.username.as_str()) {
            return Err(PipelineError::internal(
                "login",
                format!("session {} expired before login state was stored", session.id()),
            ));
        }
    }
    tracing::info!(username = %form.username, "login succeeded");
    Ok("Login success")
}

/// Data behind the API key gate.
pub async fn secure_data() -> Json<SecureDataResponse> {
    Json(SecureDataResponse::granted())
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(health().await, "OK");
    }

    #[tokio::test]
    async fn test_index_embeds_token() {
        let token = {
            let m = crate::security::CsrfManager::new("s", Default::default());
            m.token_for(&SessionId::new())
        };
        let Html(page) = index(Some(Extension(token.clone())), None).await;
        assert!(page.contains(&format!(r#"name="_csrf" value="{}""#, token)));
    }

    #[tokio::test]
    async fn test_index_escapes_username() {
        let store = Arc::new(SessionStore::default());
        let session = SessionHandle::new(store.create(), store);
        session.insert(USERNAME_KEY, "<script>x</script>");

        let Html(page) = index(None, Some(Extension(session))).await;
        assert!(page.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(!page.contains("<script>x"));
    }

    #[tokio::test]
    async fn test_login_into_expired_session_fails() {
        let credentials = InMemoryCredentialStore::new().with_user("alice", "wonderland");
        let state = AppState::with_credentials(&ServerConfig::default(), Arc::new(credentials));

        // Handle to a session the store no longer holds
        let gone = SessionHandle::new(SessionId::new(), Arc::clone(&state.sessions));
        let form = LoginForm {
            username: "alice".into(),
            password: "wonderland".into(),
        };

        let err = login(State(state), Some(Extension(gone)), Ok(Form(form)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unclassified);
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_login_stores_username() {
        let credentials = InMemoryCredentialStore::new().with_user("alice", "wonderland");
        let state = AppState::with_credentials(&ServerConfig::default(), Arc::new(credentials));
        let session = SessionHandle::new(state.sessions.create(), Arc::clone(&state.sessions));
        let form = LoginForm {
            username: "alice".into(),
            password: "wonderland".into(),
        };

        let reply = login(State(state), Some(Extension(session.clone())), Ok(Form(form)))
            .await
            .unwrap();
        assert_eq!(reply, "Login success");
        assert_eq!(session.get(USERNAME_KEY).as_deref(), Some("alice"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"a&b"c'<>"#), "a&amp;b&quot;c&#x27;&lt;&gt;");
    }

    #[test]
    fn test_app_state_new() {
        let state = AppState::new(&ServerConfig::default());
        assert_eq!(state.sessions.count(), 0);
        assert_eq!(state.api_prefix, "/secure-api");
        assert_eq!(
            state.pipeline.stage_names(),
            vec!["rate_limit", "origin", "api_key", "session", "csrf"]
        );
    }
}
