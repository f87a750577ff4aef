//! Session resolution stage.

use std::sync::Arc;

use axum::extract::Request;
use futures_util::future::{self, FutureExt};

use super::{Outcome, PipelineContext, Stage, StageFuture};
use crate::session::{read_session_cookie, session_cookie, SessionHandle, SessionStore};

/// Attaches a live session to every request that reaches it.
pub struct SessionStage {
    store: Arc<SessionStore>,
}

impl SessionStage {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    fn resolve(&self, request: &Request, ctx: &mut PipelineContext) -> Outcome {
        let config = self.store.config();
        let presented = read_session_cookie(request.headers(), &config.cookie_name);
        let resolution = self.store.resolve(presented.as_deref());

        // A rolling session refreshes the cookie's Max-Age on every response.
        if resolution.created || config.rolling {
            ctx.set_cookie = session_cookie(&resolution.id, config);
        }

        if resolution.created && presented.is_some() {
            tracing::debug!(stage = "session", "stale session cookie replaced");
        }

        ctx.session = Some(SessionHandle::new(resolution.id, Arc::clone(&self.store)));
        Outcome::Continue
    }
}

impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a> {
        future::ready(self.resolve(request, ctx)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::header::COOKIE};

    use crate::session::SessionConfig;

    fn stage(rolling: bool) -> (SessionStage, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(SessionConfig {
            rolling,
            ..SessionConfig::default()
        }));
        (SessionStage::new(Arc::clone(&store)), store)
    }

    #[test]
    fn test_new_client_gets_cookie() {
        let (stage, store) = stage(false);
        let request = Request::builder().body(Body::empty()).unwrap();
        let mut ctx = PipelineContext::default();

        assert!(matches!(stage.resolve(&request, &mut ctx), Outcome::Continue));
        let session = ctx.session.expect("session attached");
        assert!(store.contains(&session.id()));

        let cookie = ctx.set_cookie.expect("cookie issued");
        assert!(cookie
            .to_str()
            .unwrap()
            .starts_with(&format!("sid={}", session.id())));
    }

    #[test]
    fn test_returning_client_keeps_session() {
        let (stage, store) = stage(false);
        let id = store.create();
        let request = Request::builder()
            .header(COOKIE, format!("sid={}", id))
            .body(Body::empty())
            .unwrap();
        let mut ctx = PipelineContext::default();

        stage.resolve(&request, &mut ctx);
        assert_eq!(ctx.session.unwrap().id(), id);
        assert!(ctx.set_cookie.is_none());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_rolling_refreshes_cookie() {
        let (stage, store) = stage(true);
        let id = store.create();
        let request = Request::builder()
            .header(COOKIE, format!("sid={}", id))
            .body(Body::empty())
            .unwrap();
        let mut ctx = PipelineContext::default();

        stage.resolve(&request, &mut ctx);
        assert!(ctx.set_cookie.is_some());
    }
}
