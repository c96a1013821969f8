//! Session token manager
//!
//! Mints, verifies and revokes session tokens. Issuance is gated per subject
//! by an escalating cooldown; revocation writes a self-expiring blacklist entry
//! whose TTL matches the token's remaining lifetime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{StoreError, TokenError};
use crate::models::Identity;
use crate::store::{keys, CounterStore};

use super::locks::KeyedLocks;
use super::ratelimit::FlowLimiter;
use super::token::{strip_bearer, Claims, Rejection, TokenCodec};

/// Configuration for the token manager
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Symmetric signing secret
    pub secret: String,

    /// Token lifetime
    pub lifetime: Duration,

    /// Issuances permitted per subject within `base`
    pub frequency: u32,

    /// Issuance counting window
    pub base: Duration,

    /// Lockout applied once `frequency` is exceeded
    pub upgrade: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            lifetime: Duration::from_secs(72 * 3600),
            frequency: 30,
            base: Duration::from_secs(10),
            upgrade: Duration::from_secs(300),
        }
    }
}

/// A freshly minted token
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    /// Compact signed token
    pub token: String,
    /// Token id
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of verifying a bearer header
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(Claims),
    Rejected(Rejection),
}

impl Verdict {
    /// The claims, if the token was accepted
    pub fn claims(self) -> Option<Claims> {
        match self {
            Verdict::Valid(claims) => Some(claims),
            Verdict::Rejected(_) => None,
        }
    }
}

/// Token manager
pub struct TokenManager {
    codec: TokenCodec,
    config: TokenConfig,
    store: Arc<dyn CounterStore>,
    limiter: FlowLimiter,
    locks: KeyedLocks,
}

impl TokenManager {
    /// Create a new token manager
    pub fn new(store: Arc<dyn CounterStore>, config: TokenConfig) -> Self {
        Self {
            codec: TokenCodec::new(&config.secret),
            limiter: FlowLimiter::new(Arc::clone(&store)),
            store,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Mint a token for a subject
    ///
    /// Returns `Ok(None)` when the subject has requested tokens too often and
    /// should retry later.
    pub async fn issue(
        &self,
        subject_id: &str,
        subject_name: &str,
        authorities: &[String],
    ) -> Result<Option<IssuedToken>, TokenError> {
        let frequency_key = keys::key(keys::JWT_FREQUENCY, subject_id);
        let allowed = {
            let _guard = self.locks.lock(&frequency_key).await;
            self.limiter
                .limit_once_upgrade(
                    &frequency_key,
                    self.config.frequency,
                    self.config.base,
                    self.config.upgrade,
                )
                .await?
        };

        if !allowed {
            debug!(subject = %subject_id, "Token issuance throttled");
            return Ok(None);
        }

        let issued_at = Utc::now();
        let lifetime = chrono::Duration::from_std(self.config.lifetime)
            .ok()
            .filter(|lifetime| issued_at.checked_add_signed(*lifetime).is_some())
            .ok_or(TokenError::Lifetime(self.config.lifetime.as_secs()))?;
        let claims = Claims::new(subject_id, subject_name, authorities, issued_at, lifetime);
        let token = self.codec.encode(&claims)?;

        info!(subject = %subject_id, jti = %claims.jti, "Issued session token");

        Ok(Some(IssuedToken {
            token,
            expires_at: claims.expires_at(),
            jti: claims.jti,
        }))
    }

    /// Verify a bearer header value
    ///
    /// Signature, expiry and revocation failures are all `Rejected`; only a
    /// store failure during the revocation lookup is an error.
    pub async fn verify(&self, header: &str) -> Result<Verdict, StoreError> {
        let claims = match self.decode_header(header) {
            Ok(claims) => claims,
            Err(reason) => return Ok(self.reject(reason)),
        };

        if claims.is_expired_at(Utc::now()) {
            return Ok(self.reject(Rejection::Expired));
        }

        if self.is_revoked(&claims.jti).await? {
            return Ok(self.reject(Rejection::Revoked));
        }

        Ok(Verdict::Valid(claims))
    }

    /// Revoke the token carried by a bearer header
    ///
    /// Returns `false` if the signature does not verify, the token is already
    /// revoked, or it has no lifetime left.
    pub async fn revoke(&self, header: &str) -> Result<bool, StoreError> {
        let claims = match self.decode_header(header) {
            Ok(claims) => claims,
            Err(reason) => {
                debug!(reason = %reason, "Revocation refused");
                return Ok(false);
            }
        };

        if self.is_revoked(&claims.jti).await? {
            debug!(jti = %claims.jti, "Token already revoked");
            return Ok(false);
        }

        let remaining = claims.remaining_secs(Utc::now());
        if remaining == 0 {
            debug!(jti = %claims.jti, "Token already expired");
            return Ok(false);
        }

        self.store
            .set_with_ttl(
                &keys::key(keys::JWT_BLACK_LIST, &claims.jti),
                "",
                Duration::from_secs(remaining),
            )
            .await?;

        info!(jti = %claims.jti, subject = %claims.sub, remaining_secs = remaining, "Revoked session token");
        Ok(true)
    }

    /// Project claims onto the request identity
    pub fn to_identity(claims: &Claims) -> Identity {
        Identity::new(&claims.sub, &claims.name, claims.authorities.clone())
    }

    fn decode_header(&self, header: &str) -> Result<Claims, Rejection> {
        let token = strip_bearer(header).ok_or(Rejection::MissingScheme)?;
        self.codec.decode(token)
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        self.store
            .exists(&keys::key(keys::JWT_BLACK_LIST, jti))
            .await
    }

    fn reject(&self, reason: Rejection) -> Verdict {
        debug!(reason = %reason, "Token rejected");
        Verdict::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockCounterStore};

    const SECRET: &str = "test-signing-secret";

    fn create_test_manager() -> (TokenManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = TokenConfig {
            secret: SECRET.to_string(),
            frequency: 3,
            ..Default::default()
        };
        (TokenManager::new(store.clone(), config), store)
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    fn user() -> Vec<String> {
        vec!["user".to_string()]
    }

    // Test 1: Issue then verify round-trips the identity
    #[tokio::test]
    async fn test_issue_verify_round_trip() {
        let (manager, _) = create_test_manager();

        let issued = manager.issue("u1", "alice", &user()).await.unwrap().unwrap();
        let claims = manager.verify(&bearer(&issued.token)).await.unwrap().claims().unwrap();

        assert_eq!(claims.jti, issued.jti);
        let identity = TokenManager::to_identity(&claims);
        assert_eq!(identity, Identity::new("u1", "alice", user()));
    }

    // Test 2: Issued token expires after the configured lifetime
    #[tokio::test]
    async fn test_issue_sets_expiry() {
        let (manager, _) = create_test_manager();
        let before = Utc::now();

        let issued = manager.issue("u1", "alice", &user()).await.unwrap().unwrap();

        let lifetime = (issued.expires_at - before).num_seconds();
        assert!((72 * 3600 - 1..=72 * 3600).contains(&lifetime));
    }

    // Test 3: Issuance is throttled past the frequency limit
    #[tokio::test]
    async fn test_issue_throttled() {
        let (manager, store) = create_test_manager();

        for _ in 0..3 {
            assert!(manager.issue("u1", "alice", &user()).await.unwrap().is_some());
        }
        assert!(manager.issue("u1", "alice", &user()).await.unwrap().is_none());

        // Escalated lockout
        let ttl = store.ttl("jwt:frequency:u1").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(10));

        // Other subjects are unaffected
        assert!(manager.issue("u2", "bob", &user()).await.unwrap().is_some());
    }

    // Test 4: Verify rejects a missing or wrong scheme
    #[tokio::test]
    async fn test_verify_requires_bearer_scheme() {
        let (manager, _) = create_test_manager();
        let issued = manager.issue("u1", "alice", &user()).await.unwrap().unwrap();

        assert_eq!(
            manager.verify(&issued.token).await.unwrap(),
            Verdict::Rejected(Rejection::MissingScheme)
        );
        assert_eq!(
            manager.verify("").await.unwrap(),
            Verdict::Rejected(Rejection::MissingScheme)
        );
    }

    // Test 5: Verify rejects tampered and foreign tokens
    #[tokio::test]
    async fn test_verify_rejects_bad_tokens() {
        let (manager, _) = create_test_manager();

        assert_eq!(
            manager.verify("Bearer not.a.token").await.unwrap(),
            Verdict::Rejected(Rejection::Malformed)
        );

        let claims = Claims::new("u1", "alice", &user(), Utc::now(), chrono::Duration::hours(1));
        let foreign = TokenCodec::new("another-secret").encode(&claims).unwrap();
        assert_eq!(
            manager.verify(&bearer(&foreign)).await.unwrap(),
            Verdict::Rejected(Rejection::BadSignature)
        );
    }

    // Test 6: Expired token fails verification even if never revoked
    #[tokio::test]
    async fn test_verify_rejects_expired() {
        let (manager, _) = create_test_manager();
        let claims = Claims::new(
            "u1",
            "alice",
            &user(),
            Utc::now() - chrono::Duration::hours(2),
            chrono::Duration::hours(1),
        );
        let token = TokenCodec::new(SECRET).encode(&claims).unwrap();

        assert_eq!(
            manager.verify(&bearer(&token)).await.unwrap(),
            Verdict::Rejected(Rejection::Expired)
        );
        // No lifetime left to revoke
        assert!(!manager.revoke(&bearer(&token)).await.unwrap());
    }

    // Test 7: Issue, verify, revoke, verify again
    #[tokio::test]
    async fn test_revoke_lifecycle() {
        let (manager, store) = create_test_manager();
        let issued = manager.issue("u1", "alice", &user()).await.unwrap().unwrap();
        let header = bearer(&issued.token);

        let claims = manager.verify(&header).await.unwrap().claims().unwrap();
        assert_eq!(claims.name, "alice");

        assert!(manager.revoke(&header).await.unwrap());
        assert_eq!(
            manager.verify(&header).await.unwrap(),
            Verdict::Rejected(Rejection::Revoked)
        );

        // Blacklist entry dies with the token
        let ttl = store
            .ttl(&format!("jwt:blacklist:{}", issued.jti))
            .await
            .unwrap()
            .unwrap();
        assert!(ttl <= Duration::from_secs(72 * 3600));
        assert!(ttl > Duration::from_secs(71 * 3600));
    }

    // Test 8: Revoking twice reports failure the second time
    #[tokio::test]
    async fn test_revoke_idempotent() {
        let (manager, _) = create_test_manager();
        let issued = manager.issue("u1", "alice", &user()).await.unwrap().unwrap();
        let header = bearer(&issued.token);

        assert!(manager.revoke(&header).await.unwrap());
        assert!(!manager.revoke(&header).await.unwrap());
    }

    // Test 9: Revoke refuses tokens that do not verify
    #[tokio::test]
    async fn test_revoke_invalid_token() {
        let (manager, store) = create_test_manager();

        assert!(!manager.revoke("Bearer garbage").await.unwrap());
        assert!(!manager.revoke("garbage").await.unwrap());
        assert!(store.is_empty().await);
    }

    // Test 10: Store outage during verification is an error, not a verdict
    #[tokio::test]
    async fn test_verify_store_outage() {
        let mut mock = MockCounterStore::new();
        mock.expect_exists()
            .returning(|_| Err(StoreError::Timeout(500)));

        let manager = TokenManager::new(
            Arc::new(mock),
            TokenConfig {
                secret: SECRET.to_string(),
                ..Default::default()
            },
        );
        let claims = Claims::new("u1", "alice", &user(), Utc::now(), chrono::Duration::hours(1));
        let token = TokenCodec::new(SECRET).encode(&claims).unwrap();

        let result = manager.verify(&bearer(&token)).await;
        assert!(matches!(result, Err(StoreError::Timeout(500))));
    }

    // Test 11: Store outage during issuance propagates
    #[tokio::test]
    async fn test_issue_store_outage() {
        let mut mock = MockCounterStore::new();
        mock.expect_get()
            .returning(|_| Err(StoreError::Connection("refused".to_string())));

        let manager = TokenManager::new(Arc::new(mock), TokenConfig::default());
        let result = manager.issue("u1", "alice", &user()).await;

        assert!(matches!(result, Err(TokenError::Store(StoreError::Connection(_)))));
    }

    // Test 12: A lifetime past the calendar range is an error, not a panic
    #[tokio::test]
    async fn test_issue_lifetime_out_of_range() {
        let store = Arc::new(MemoryStore::new());
        for secs in [u64::MAX, u64::MAX / 3600 * 3600, 300_000 * 365 * 24 * 3600] {
            let manager = TokenManager::new(
                store.clone(),
                TokenConfig {
                    secret: SECRET.to_string(),
                    lifetime: Duration::from_secs(secs),
                    ..Default::default()
                },
            );

            let result = manager.issue(&format!("u{}", secs), "alice", &user()).await;
            assert!(matches!(result, Err(TokenError::Lifetime(s)) if s == secs));
        }
    }
}
