//! Application error types for authgate
//!
//! Throttling and verification failures are ordinary outcomes and are not
//! represented here. These types cover genuine faults: an unreachable counter
//! store, a token that cannot be signed, or a mail sender that refuses work.

use thiserror::Error;

/// Counter store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Could not reach the store
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command
    #[error("Store command error: {0}")]
    Command(String),

    /// The command did not complete within the client-side timeout
    #[error("Store command timed out after {0} ms")]
    Timeout(u64),

    /// A value under the key could not be interpreted
    #[error("Corrupt value under key {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Token issuance errors
#[derive(Debug, Error)]
pub enum TokenError {
    /// Store failure while checking issuance frequency
    #[error("Token store error: {0}")]
    Store(#[from] StoreError),

    /// Signing the claims failed
    #[error("Failed to encode token: {0}")]
    Encode(String),

    /// The configured lifetime pushes expiry past the representable range
    #[error("Token lifetime of {0} seconds is out of range")]
    Lifetime(u64),
}

/// Verification code errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Store failure while throttling or storing the code
    #[error("Verification store error: {0}")]
    Store(#[from] StoreError),

    /// The mail sender refused the message
    #[error("Failed to dispatch verification mail: {0}")]
    Mail(String),
}

/// Application-level error type
///
/// Aggregates the domain errors that abort a request. The HTTP mapping lives
/// in the server module.
#[derive(Debug, Error)]
pub enum AppError {
    /// Counter store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Token failure
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Verification failure
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: StoreError messages
    #[test]
    fn test_store_error_messages() {
        assert_eq!(
            StoreError::Connection("refused".to_string()).to_string(),
            "Store connection error: refused"
        );
        assert_eq!(
            StoreError::Timeout(250).to_string(),
            "Store command timed out after 250 ms"
        );
        assert_eq!(
            StoreError::Corrupt("flow:counter:1.2.3.4".to_string()).to_string(),
            "Corrupt value under key flow:counter:1.2.3.4"
        );
    }

    // Test 2: TokenError from StoreError
    #[test]
    fn test_token_error_from_store_error() {
        let token_err: TokenError = StoreError::Timeout(10).into();
        match token_err {
            TokenError::Store(StoreError::Timeout(10)) => (),
            _ => panic!("Expected TokenError::Store"),
        }
    }

    // Test 3: AppError display includes source error
    #[test]
    fn test_app_error_display() {
        let app_err = AppError::Store(StoreError::Command("WRONGTYPE".to_string()));
        assert_eq!(
            app_err.to_string(),
            "Store error: Store command error: WRONGTYPE"
        );

        let app_err: AppError = TokenError::Encode("bad key".to_string()).into();
        assert_eq!(
            app_err.to_string(),
            "Token error: Failed to encode token: bad key"
        );
    }

    // Test 4: Lifetime error names the configured seconds
    #[test]
    fn test_token_lifetime_error() {
        let app_err: AppError = TokenError::Lifetime(u64::MAX).into();
        assert_eq!(
            app_err.to_string(),
            format!("Token error: Token lifetime of {} seconds is out of range", u64::MAX)
        );
    }

    // Test 5: VerifyError converts into AppError
    #[test]
    fn test_verify_error_into_app_error() {
        let app_err: AppError = VerifyError::Mail("queue full".to_string()).into();
        assert_eq!(
            app_err.to_string(),
            "Verification error: Failed to dispatch verification mail: queue full"
        );

        let verify_err: VerifyError = StoreError::Timeout(5).into();
        assert!(matches!(verify_err, VerifyError::Store(StoreError::Timeout(5))));
    }

    // Test 6: StoreError Clone and PartialEq
    #[test]
    fn test_store_error_clone_and_eq() {
        let err1 = StoreError::Connection("down".to_string());
        let err2 = err1.clone();
        assert_eq!(err1, err2);
        assert_ne!(err1, StoreError::Connection("other".to_string()));
    }
}
