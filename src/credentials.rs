//! Credential lookup for the login route.
//!
//! The credential store itself is an external collaborator. What this module
//! fixes is the shape of the lookup: a constant query text with positional
//! placeholders and the user input carried separately as bound parameters.

use std::collections::HashMap;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Parameterized login lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginQuery {
    username: String,
    password: String,
}

impl LoginQuery {
    /// Query text. Input is never spliced into it.
    pub const SQL: &'static str = "SELECT * FROM users WHERE username = ? AND password = ?";

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn sql(&self) -> &'static str {
        Self::SQL
    }

    /// Bound parameters, in placeholder order.
    pub fn params(&self) -> [&str; 2] {
        [&self.username, &self.password]
    }
}

/// Backend answering login lookups.
pub trait CredentialStore: Send + Sync {
    /// Run the query; `true` if a matching row exists.
    fn execute<'a>(&'a self, query: &'a LoginQuery) -> BoxFuture<'a, Result<bool>>;
}

/// Configured user entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    /// Hex BLAKE3 digest of the password.
    pub password_blake3: String,
}

/// In-process credential table.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: HashMap<String, blake3::Hash>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured entries, skipping ones with a malformed digest.
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut store = Self::new();
        for entry in entries {
            match blake3::Hash::from_hex(entry.password_blake3.trim()) {
                Ok(digest) => {
                    store.users.insert(entry.username.clone(), digest);
                }
                Err(_) => {
                    tracing::warn!(username = %entry.username, "ignoring user with malformed password digest")
                }
            }
        }
        store
    }

    /// Add a user with a plaintext password (hashed on insert).
    pub fn with_user(mut self, username: impl Into<String>, password: &str) -> Self {
        self.users
            .insert(username.into(), blake3::hash(password.as_bytes()));
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn execute<'a>(&'a self, query: &'a LoginQuery) -> BoxFuture<'a, Result<bool>> {
        let [username, password] = query.params();
        let found = self
            .users
            .get(username)
            .is_some_and(|digest| *digest == blake3::hash(password.as_bytes()));
        future::ready(Ok(found)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_text_is_constant() {
        let hostile = LoginQuery::new("admin' OR '1'='1", "x' --");
        assert_eq!(hostile.sql(), LoginQuery::SQL);
        assert!(!hostile.sql().contains("admin"));
        assert_eq!(hostile.params(), ["admin' OR '1'='1", "x' --"]);
    }

    #[test]
    fn test_in_memory_lookup() {
        let store = InMemoryCredentialStore::new().with_user("alice", "wonderland");

        let ok = tokio_test::block_on(store.execute(&LoginQuery::new("alice", "wonderland")));
        assert!(ok.unwrap());

        let wrong = tokio_test::block_on(store.execute(&LoginQuery::new("alice", "nope")));
        assert!(!wrong.unwrap());

        let unknown = tokio_test::block_on(store.execute(&LoginQuery::new("bob", "wonderland")));
        assert!(!unknown.unwrap());
    }

    #[test]
    fn test_injection_does_not_match() {
        let store = InMemoryCredentialStore::new().with_user("admin", "hunter2");
        let query = LoginQuery::new("admin' --", "");
        assert!(!tokio_test::block_on(store.execute(&query)).unwrap());
    }

    #[test]
    fn test_from_entries() {
        let entries = vec![
            UserEntry {
                username: "alice".into(),
                password_blake3: blake3::hash(b"pw").to_hex().to_string(),
            },
            UserEntry {
                username: "broken".into(),
                password_blake3: "zz".into(),
            },
        ];

        let store = InMemoryCredentialStore::from_entries(&entries);
        assert_eq!(store.len(), 1);
        assert!(tokio_test::block_on(store.execute(&LoginQuery::new("alice", "pw"))).unwrap());
    }
}
