//! Identity and auth endpoint models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity resolved from a valid session token
///
/// Inserted into request and response extensions by the token stage. Handlers
/// that need an authenticated caller extract it; anonymous requests carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account id
    pub subject_id: String,

    /// Display name
    pub subject_name: String,

    /// Granted authorities, in issue order
    pub authorities: Vec<String>,
}

impl Identity {
    /// Create a new identity
    pub fn new(
        subject_id: impl Into<String>,
        subject_name: impl Into<String>,
        authorities: Vec<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_name: subject_name.into(),
            authorities,
        }
    }

    /// Check whether the identity holds an authority
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id: {}, authorities: [{}])",
            self.subject_name,
            self.subject_id,
            self.authorities.join(", ")
        )
    }
}

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub username: String,
    pub password: String,
}

/// Successful login body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub username: String,
    pub role: String,
    pub token: String,
    /// When the token stops being accepted
    pub expire: DateTime<Utc>,
}

/// Purpose of a verification code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Register,
    Reset,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::Register => "register",
            CodeKind::Reset => "reset",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query of `GET /api/auth/ask-code`
#[derive(Debug, Clone, Deserialize)]
pub struct AskCodeQuery {
    pub email: String,
    #[serde(rename = "type")]
    pub kind: CodeKind,
}

/// Body of `POST /api/auth/verify-code`
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}
