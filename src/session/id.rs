//! Session identifier type.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

/// Number of random bytes in a session identifier.
pub const SESSION_ID_LEN: usize = 32;

/// Opaque, unguessable identifier for a client session.
///
/// Generated from the thread-local CSPRNG and carried in the session cookie
/// as 64 lowercase hex characters. Nothing else about the session ever
/// leaves the server.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    /// Create a SessionId from raw bytes.
    ///
    /// This is primarily for testing.
    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Only a prefix goes to logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}..)", &hex::encode(&self.0[..4]))
    }
}

impl FromStr for SessionId {
    type Err = crate::error::ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::error::ShieldError::InvalidSessionId(s.chars().take(16).collect());

        if s.len() != SESSION_ID_LEN * 2 {
            return Err(invalid());
        }

        let mut bytes = [0u8; SESSION_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}
