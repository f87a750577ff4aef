//! Session cookie encoding.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use cookie::{time, Cookie, SameSite};

use super::{SessionConfig, SessionId};

/// Find the session identifier among the request's cookies.
///
/// Returns the raw value; validation happens when the store parses it.
pub fn read_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

/// Build the `Set-Cookie` value carrying a session identifier.
pub fn session_cookie(id: &SessionId, config: &SessionConfig) -> Option<HeaderValue> {
    let max_age = i64::try_from(config.idle_timeout.as_secs()).unwrap_or(i64::MAX);

    let cookie = Cookie::build((config.cookie_name.clone(), id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookie)
        .max_age(time::Duration::seconds(max_age))
        .build();

    HeaderValue::from_str(&cookie.to_string()).ok()
}
