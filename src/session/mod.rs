//! Session management module.
//!
//! Sessions live server-side in a concurrent table keyed by an opaque
//! identifier; the client only ever holds that identifier in a cookie.

mod cookies;
mod id;
mod store;

pub use cookies::{read_session_cookie, session_cookie};
pub use id::{SessionId, SESSION_ID_LEN};
pub use store::{Resolution, Session, SessionConfig, SessionHandle, SessionStore};
