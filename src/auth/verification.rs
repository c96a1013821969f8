//! Email verification codes
//!
//! A client address may request one code per cooldown window. Codes are six
//! digits, stored per email with a short TTL and consumed on first valid use.
//! Delivery is delegated to a [`MailSender`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use crate::error::{StoreError, VerifyError};
use crate::models::CodeKind;
use crate::store::{keys, CounterStore};

use super::locks::KeyedLocks;
use super::ratelimit::FlowLimiter;

/// Verification mail handed to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMail {
    pub kind: CodeKind,
    pub email: String,
    pub code: u32,
}

impl VerificationMail {
    pub fn subject(&self) -> &'static str {
        match self.kind {
            CodeKind::Register => "Welcome to our website",
            CodeKind::Reset => "Password Reset Email",
        }
    }

    pub fn body(&self, valid_for: Duration) -> String {
        let minutes = valid_for.as_secs().div_ceil(60);
        match self.kind {
            CodeKind::Register => format!(
                "Your registration verification code is: {}. It is valid for {} minutes. \
                 For your account's security, please do not disclose the verification code to others.",
                self.code, minutes
            ),
            CodeKind::Reset => format!(
                "Hello, you are performing a password reset operation. The verification code is: {}. \
                 It is valid for {} minutes. If this is not your operation, please ignore it.",
                self.code, minutes
            ),
        }
    }
}

/// Outbound mail delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &VerificationMail) -> Result<(), VerifyError>;
}

/// Sender that only records the dispatch in the log
#[derive(Debug, Default)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, mail: &VerificationMail) -> Result<(), VerifyError> {
        info!(
            email = %mail.email,
            kind = %mail.kind,
            subject = mail.subject(),
            "Verification mail dispatched"
        );
        Ok(())
    }
}

/// Result of a code request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskOutcome {
    Sent,
    /// The address asked too recently
    Throttled,
}

/// Result of checking a submitted code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// No code pending for the email
    Missing,
    Mismatch,
    Valid,
}

impl CodeCheck {
    /// Failure message for the client, `None` when valid
    pub fn message(&self) -> Option<&'static str> {
        match self {
            CodeCheck::Missing => Some("Please get the verification code first"),
            CodeCheck::Mismatch => Some("Incorrect verification code, please re-enter"),
            CodeCheck::Valid => None,
        }
    }
}

/// Timing for verification codes
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Cooldown between code requests from one address
    pub mail_limit: Duration,
    /// Lifetime of a stored code
    pub code_ttl: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            mail_limit: Duration::from_secs(60),
            code_ttl: Duration::from_secs(180),
        }
    }
}

/// Verification code service
pub struct VerificationService {
    store: Arc<dyn CounterStore>,
    limiter: FlowLimiter,
    sender: Arc<dyn MailSender>,
    locks: KeyedLocks,
    config: VerificationConfig,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn CounterStore>,
        sender: Arc<dyn MailSender>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            limiter: FlowLimiter::new(Arc::clone(&store)),
            store,
            sender,
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Generate, store and send a code for `email`, throttled per `address`
    pub async fn ask_code(
        &self,
        kind: CodeKind,
        email: &str,
        address: &str,
    ) -> Result<AskOutcome, VerifyError> {
        let limit_key = keys::key(keys::VERIFY_EMAIL_LIMIT, address);
        let _guard = self.locks.lock(&limit_key).await;

        if !self
            .limiter
            .limit_once(&limit_key, self.config.mail_limit)
            .await?
        {
            debug!(address = %address, "Verification code request throttled");
            return Ok(AskOutcome::Throttled);
        }

        let code: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        let mail = VerificationMail {
            kind,
            email: email.to_string(),
            code,
        };

        self.sender.send(&mail).await?;
        self.store
            .set_with_ttl(
                &keys::key(keys::VERIFY_EMAIL_DATA, email),
                &code.to_string(),
                self.config.code_ttl,
            )
            .await?;

        Ok(AskOutcome::Sent)
    }

    /// Check a submitted code; a valid code is consumed
    pub async fn confirm(&self, email: &str, code: &str) -> Result<CodeCheck, StoreError> {
        let key = keys::key(keys::VERIFY_EMAIL_DATA, email);
        let Some(stored) = self.store.get(&key).await? else {
            return Ok(CodeCheck::Missing);
        };

        if stored != code.trim() {
            return Ok(CodeCheck::Mismatch);
        }

        self.store.delete(&key).await?;
        Ok(CodeCheck::Valid)
    }

    /// Lifetime of a stored code
    pub fn code_ttl(&self) -> Duration {
        self.config.code_ttl
    }
}
