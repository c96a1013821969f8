//! Structured response envelope
//!
//! Every JSON body produced by authgate, success or failure, has the shape
//! `{id, code, data, message}`. `id` is the request id assigned at the edge,
//! `data` is `null` when absent, and the HTTP status mirrors `code`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Message used by every throttled response
pub const TOO_MANY_REQUESTS: &str = "Too many requests, please try again later";

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Request id
    pub id: i64,

    /// Status code, mirrored in the HTTP status
    pub code: u16,

    /// Payload, `null` on failure
    pub data: Option<T>,

    /// Human-readable message
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// 200 with a payload
    pub fn success(id: i64, data: T) -> Self {
        Self {
            id,
            code: 200,
            data: Some(data),
            message: "Request successful".to_string(),
        }
    }

    /// 200 without a payload
    pub fn success_empty(id: i64) -> Self {
        Self {
            id,
            code: 200,
            data: None,
            message: "Request successful".to_string(),
        }
    }

    /// Failure with an arbitrary code
    pub fn failure(id: i64, code: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            data: None,
            message: message.into(),
        }
    }

    pub fn forbidden(id: i64, message: impl Into<String>) -> Self {
        Self::failure(id, 403, message)
    }

    pub fn unauthorized(id: i64, message: impl Into<String>) -> Self {
        Self::failure(id, 401, message)
    }

    pub fn internal(id: i64) -> Self {
        Self::failure(id, 500, "Internal error, please contact the administrator")
    }

    /// HTTP status for this envelope
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
