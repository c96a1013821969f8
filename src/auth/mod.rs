//! Authentication and abuse control
//!
//! - Counter-store rate limiting with three throttling strategies
//! - Per-identity lock registry
//! - Session token issue, verification and revocation
//! - Account lookup, password checks and email verification codes

pub mod accounts;
pub mod flow;
pub mod locks;
pub mod manager;
pub mod password;
pub mod ratelimit;
pub mod token;
pub mod verification;

pub use accounts::{Account, AccountDirectory, StaticAccounts};
pub use flow::{FlowGate, FlowGateConfig};
pub use locks::{KeyGuard, KeyedLocks};
pub use manager::{IssuedToken, TokenConfig, TokenManager, Verdict};
pub use password::{hash_password, verify_password, HashError};
pub use ratelimit::FlowLimiter;
pub use token::{strip_bearer, Claims, Rejection, TokenCodec, BEARER_PREFIX};
pub use verification::{
    AskOutcome, CodeCheck, LogMailSender, MailSender, VerificationConfig, VerificationMail,
    VerificationService,
};

#[cfg(test)]
pub use accounts::MockAccountDirectory;
