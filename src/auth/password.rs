//! Password hashing
//!
//! Account passwords are stored as Argon2id PHC strings. Hashes are produced
//! offline with `authgate --hash-password` and checked at login.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use thiserror::Error;

/// Error type for password hashing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HashError {
    #[error("Hash failed: {0}")]
    HashFailed(String),
}

/// Hash a password using Argon2id with a random salt
///
/// # Example
///
/// ```
/// use authgate::auth::password::hash_password;
///
/// let hash = hash_password("hunter2").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashFailed(e.to_string()))
}

/// Verify a password against a stored PHC hash
///
/// An unparsable hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}
