//! API request and response types.

use serde::{Deserialize, Serialize};

/// Login form submission.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Payload of the API-key-protected data route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureDataResponse {
    pub message: String,
}

impl SecureDataResponse {
    pub fn granted() -> Self {
        Self {
            message: "Access granted to secure API route.".to_string(),
        }
    }
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "API_KEY_INVALID").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
