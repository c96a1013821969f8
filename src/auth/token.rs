//! Session token claims and codec
//!
//! Tokens are HS256 JWTs carrying the subject identity, its authorities and
//! issue/expiry timestamps. Expiry is checked by the caller against its own
//! clock, so the codec only verifies signature and structure.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

/// Scheme prefix of the `Authorization` header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Claims embedded in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Unique token id, the revocation key
    pub jti: String,
    /// Subject id
    pub sub: String,
    /// Subject display name
    pub name: String,
    pub authorities: Vec<String>,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expires at, seconds since the epoch
    pub exp: i64,
}

impl Claims {
    /// Build claims with a fresh token id
    pub fn new(
        subject_id: &str,
        subject_name: &str,
        authorities: &[String],
        issued_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            jti: Uuid::new_v4().to_string(),
            sub: subject_id.to_string(),
            name: subject_name.to_string(),
            authorities: authorities.to_vec(),
            iat: issued_at.timestamp(),
            exp: (issued_at + lifetime).timestamp(),
        }
    }

    /// Expiry as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the token is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// Seconds of validity left at `now`, never negative
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.exp - now.timestamp()).max(0) as u64
    }
}

/// Why a token was not accepted
///
/// Callers only see "no identity"; the reason feeds logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Header missing or not using the bearer scheme
    MissingScheme,
    /// Not a structurally valid token
    Malformed,
    /// Signature does not match the signing key
    BadSignature,
    Expired,
    Revoked,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingScheme => "missing_scheme",
            Rejection::Malformed => "malformed",
            Rejection::BadSignature => "bad_signature",
            Rejection::Expired => "expired",
            Rejection::Revoked => "revoked",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip the bearer scheme from an `Authorization` header value
///
/// Returns `None` when the prefix is absent or nothing follows it.
pub fn strip_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// HS256 signer and verifier over a shared secret
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec from the signing secret
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign claims into a compact token
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verify signature and structure, ignoring expiry
    pub fn decode(&self, token: &str) -> Result<Claims, Rejection> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => Rejection::BadSignature,
                _ => Rejection::Malformed,
            })
    }
}
