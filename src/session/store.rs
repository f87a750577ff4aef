//! Session storage and management.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::SessionId;

/// Session lifetime policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session expires.
    pub idle_timeout: Duration,
    /// Push the expiry forward on every access.
    pub rolling: bool,
    /// Cookie carrying the session identifier.
    pub cookie_name: String,
    /// Mark the cookie `Secure` (HTTPS only).
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            rolling: true,
            cookie_name: "sid".to_string(),
            secure_cookie: false,
        }
    }
}

/// Server-side state for one client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Time when session was created.
    pub created_at: Instant,
    /// Time after which the session is no longer honoured.
    pub expires_at: Instant,
    /// Arbitrary session-scoped state.
    pub values: HashMap<String, String>,
}

impl Session {
    fn new(id: SessionId, now: Instant, idle_timeout: Duration) -> Self {
        Self {
            id,
            created_at: now,
            expires_at: now + idle_timeout,
            values: HashMap::new(),
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of resolving the session cookie of a request.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub id: SessionId,
    /// A fresh session was allocated; its cookie must be set.
    pub created: bool,
}

/// Concurrent session table.
///
/// Backed by a sharded map, so each read-modify-write on a session holds
/// only the lock of that session's shard.
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    config: SessionConfig,
    last_purge: Mutex<Instant>,
}

impl SessionStore {
    /// Create a new empty session store.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            last_purge: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolve the identifier presented by the client into a live session.
    ///
    /// Absent, malformed, unknown or expired identifiers all yield a fresh
    /// session.
    pub fn resolve(&self, presented: Option<&str>) -> Resolution {
        self.resolve_at(presented, Instant::now())
    }

    pub(crate) fn resolve_at(&self, presented: Option<&str>, now: Instant) -> Resolution {
        self.maybe_purge(now);

        if let Some(id) = presented.and_then(|raw| raw.parse::<SessionId>().ok()) {
            let mut expired = false;
            if let Some(mut session) = self.sessions.get_mut(&id) {
                if session.is_expired_at(now) {
                    expired = true;
                } else {
                    if self.config.rolling {
                        session.expires_at = now + self.config.idle_timeout;
                    }
                    return Resolution { id, created: false };
                }
            }

            if expired {
                self.sessions.remove_if(&id, |_, s| s.is_expired_at(now));
                tracing::debug!(session = ?id, "session expired");
            }
        }

        Resolution {
            id: self.create_at(now),
            created: true,
        }
    }

    /// Allocate a new session.
    pub fn create(&self) -> SessionId {
        self.create_at(Instant::now())
    }

    fn create_at(&self, now: Instant) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .insert(id, Session::new(id, now, self.config.idle_timeout));
        tracing::debug!(session = ?id, "session created");
        id
    }

    /// Get a snapshot of a live session.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions
            .get(id)
            .filter(|s| !s.is_expired_at(Instant::now()))
            .map(|s| s.value().clone())
    }

    /// Check whether a live session exists.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Update a live session in place. Returns `None` if it is gone.
    pub fn update<F, R>(&self, id: &SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut session = self.sessions.get_mut(id)?;
        if session.is_expired_at(Instant::now()) {
            return None;
        }
        Some(f(&mut session))
    }

    /// Get the number of sessions in the store.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    fn maybe_purge(&self, now: Instant) {
        let due = match self.last_purge.try_lock() {
            Ok(mut last) if now.saturating_duration_since(*last) > self.config.idle_timeout => {
                *last = now;
                true
            }
            _ => false,
        };

        if due {
            let removed = self.purge_expired_at(now);
            if removed > 0 {
                tracing::debug!(removed, "purged expired sessions");
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Accessor handed to handlers for the session of the current request.
///
/// Every call reads through the store, so concurrent requests carrying the
/// same identifier observe the same state.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    store: Arc<SessionStore>,
}

impl SessionHandle {
    pub fn new(id: SessionId, store: Arc<SessionStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session is still live.
    pub fn is_valid(&self) -> bool {
        self.store.contains(&self.id)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store
            .get(&self.id)
            .and_then(|s| s.values.get(key).cloned())
    }

    /// Store a value. Returns false if the session has expired meanwhile.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let (key, value) = (key.into(), value.into());
        self.store
            .update(&self.id, |s| {
                s.values.insert(key, value);
            })
            .is_some()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.store
            .update(&self.id, |s| s.values.remove(key))
            .flatten()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_store() -> SessionStore {
        SessionStore::new(SessionConfig {
            idle_timeout: Duration::from_secs(60),
            ..SessionConfig::default()
        })
    }

    #[test]
    fn test_resolve_without_cookie_creates() {
        let store = short_store();
        let res = store.resolve(None);

        assert!(res.created);
        assert!(store.contains(&res.id));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_resolve_existing_session() {
        let store = short_store();
        let first = store.resolve(None);
        let second = store.resolve(Some(&first.id.to_string()));

        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_resolve_unknown_or_malformed() {
        let store = short_store();

        let unknown = SessionId::new().to_string();
        assert!(store.resolve(Some(&unknown)).created);
        assert!(store.resolve(Some("not-a-session")).created);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_resolve_expired_session() {
        let store = short_store();
        let start = Instant::now();
        let first = store.resolve_at(None, start);

        let later = start + Duration::from_secs(61);
        let second = store.resolve_at(Some(&first.id.to_string()), later);

        assert!(second.created);
        assert_ne!(first.id, second.id);
        assert!(store.sessions.get(&first.id).is_none());
    }

    #[test]
    fn test_rolling_expiry_extends() {
        let store = short_store();
        let start = Instant::now();
        let first = store.resolve_at(None, start);
        let cookie = first.id.to_string();

        // Touch every 45s; each access pushes the deadline another 60s.
        for step in 1..=4 {
            let at = start + Duration::from_secs(45 * step);
            assert!(!store.resolve_at(Some(&cookie), at).created);
        }
    }

    #[test]
    fn test_fixed_expiry_when_not_rolling() {
        let store = SessionStore::new(SessionConfig {
            idle_timeout: Duration::from_secs(60),
            rolling: false,
            ..SessionConfig::default()
        });
        let start = Instant::now();
        let first = store.resolve_at(None, start);
        let cookie = first.id.to_string();

        assert!(!store
            .resolve_at(Some(&cookie), start + Duration::from_secs(45))
            .created);
        assert!(store
            .resolve_at(Some(&cookie), start + Duration::from_secs(61))
            .created);
    }

    #[test]
    fn test_handle_values() {
        let store = Arc::new(SessionStore::default());
        let id = store.create();
        let handle = SessionHandle::new(id, Arc::clone(&store));
        let other = SessionHandle::new(id, Arc::clone(&store));

        assert!(handle.is_valid());
        assert!(handle.insert("username", "alice"));
        assert_eq!(other.get("username"), Some("alice".to_string()));

        assert_eq!(other.remove("username"), Some("alice".to_string()));
        assert_eq!(handle.get("username"), None);
    }

    #[test]
    fn test_handle_on_missing_session() {
        let store = Arc::new(SessionStore::default());
        let handle = SessionHandle::new(SessionId::new(), store);

        assert!(!handle.is_valid());
        assert!(!handle.insert("k", "v"));
        assert_eq!(handle.get("k"), None);
    }

    #[test]
    fn test_purge_expired() {
        let store = short_store();
        let start = Instant::now();
        store.resolve_at(None, start);
        store.resolve_at(None, start);

        assert_eq!(store.purge_expired_at(start + Duration::from_secs(120)), 2);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = Arc::new(SessionStore::default());
        let id = store.create();
        let mut handles = vec![];

        // 100 threads each bump a shared counter in the same session
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .update(&id, |s| {
                        let n: u32 = s
                            .values
                            .get("hits")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        s.values.insert("hits".into(), (n + 1).to_string());
                    })
                    .unwrap();
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let session = store.get(&id).unwrap();
        assert_eq!(session.values.get("hits").map(String::as_str), Some("100"));
    }
}
