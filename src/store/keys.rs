//! Key namespaces in the counter store

/// Revoked token ids
pub const JWT_BLACK_LIST: &str = "jwt:blacklist:";
/// Token issuance frequency per subject
pub const JWT_FREQUENCY: &str = "jwt:frequency:";
/// Request counter per client address
pub const FLOW_LIMIT_COUNTER: &str = "flow:counter:";
/// Request block marker per client address
pub const FLOW_LIMIT_BLOCK: &str = "flow:block:";
/// Verification code cooldown per client address
pub const VERIFY_EMAIL_LIMIT: &str = "verify:email:limit:";
/// Pending verification code per email address
pub const VERIFY_EMAIL_DATA: &str = "verify:email:data:";

/// Joins a namespace and an identity into a store key
pub fn key(namespace: &str, identity: impl std::fmt::Display) -> String {
    format!("{}{}", namespace, identity)
}
