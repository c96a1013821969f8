//! Domain models for authgate
//!
//! Identities resolved from tokens, the request and response bodies of the
//! auth endpoints, and the structured response envelope.

pub mod auth;
pub mod response;

// Re-export commonly used types
pub use auth::{
    AskCodeQuery, AuthorizeResponse, CodeKind, Identity, LoginRequest, VerifyCodeRequest,
};
pub use response::ApiResponse;
