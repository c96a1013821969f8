//! HTTP router for authgate
//!
//! This module defines the axum router and the shared application state.
//! It provides routes for:
//! - Health checks
//! - Login, logout and email verification codes
//! - The authenticated caller's identity

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Json},
    routing::get,
    routing::post,
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::auth::{
    verify_password, AccountDirectory, AskOutcome, FlowGate, MailSender, TokenManager,
    VerificationService,
};
use crate::config::Config;
use crate::error::AppError;
use crate::models::response::TOO_MANY_REQUESTS;
use crate::models::{
    ApiResponse, AskCodeQuery, AuthorizeResponse, Identity, LoginRequest, VerifyCodeRequest,
};
use crate::otel::Metrics;
use crate::store::CounterStore;

use super::middleware::{CorsPolicy, RequestLogPolicy};
use super::request_id::{current_id, SnowflakeIds};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Session tokens
    pub tokens: Arc<TokenManager>,

    /// Account lookup
    pub accounts: Arc<dyn AccountDirectory>,

    /// Email verification codes
    pub verification: Arc<VerificationService>,

    /// Per-address request gate
    pub flow_gate: Arc<FlowGate>,

    /// CORS header policy
    pub cors: Arc<CorsPolicy>,

    /// Request logging policy
    pub request_log: Arc<RequestLogPolicy>,

    /// Request id generator
    pub request_ids: Arc<SnowflakeIds>,

    /// Pipeline metrics
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire every component to one counter store
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CounterStore>,
        accounts: Arc<dyn AccountDirectory>,
        mail: Arc<dyn MailSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            tokens: Arc::new(TokenManager::new(
                Arc::clone(&store),
                config.token_config(),
            )),
            accounts,
            verification: Arc::new(VerificationService::new(
                Arc::clone(&store),
                mail,
                config.verification_config(),
            )),
            flow_gate: Arc::new(FlowGate::new(store, config.flow_gate_config())),
            cors: Arc::new(CorsPolicy::new(&config.cors)),
            request_log: Arc::new(RequestLogPolicy::new(&config.request_log)),
            request_ids: Arc::new(SnowflakeIds::new(config.request_id.worker_id)),
            metrics,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the application routes
///
/// The pipeline stages are applied separately, see [`super::pipeline`].
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", get(logout_handler).post(logout_handler))
        .route("/api/auth/ask-code", get(ask_code_handler))
        .route("/api/auth/verify-code", post(verify_code_handler))
        .route("/api/user/me", get(me_handler))
        .with_state(state)
}

/// Log a fault and turn it into a structured 500
pub(crate) fn fault<T>(id: i64, err: impl Into<AppError>) -> ApiResponse<T> {
    let err = err.into();
    error!(request_id = id, error = %err, "Request failed");
    ApiResponse::internal(id)
}

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Password login; returns a fresh session token
async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResponse<AuthorizeResponse> {
    let id = current_id(&headers);
    let Ok(Json(request)) = request else {
        return ApiResponse::failure(id, 400, "Invalid request parameters");
    };

    let account = match state.accounts.find(&request.username).await {
        Some(account) if verify_password(&request.password, &account.password_hash) => account,
        _ => {
            debug!(username = %request.username, "Login refused");
            return ApiResponse::unauthorized(id, "Incorrect username or password");
        }
    };

    let authorities = vec![account.role.clone()];
    match state
        .tokens
        .issue(&account.id, &account.username, &authorities)
        .await
    {
        Ok(Some(issued)) => ApiResponse::success(
            id,
            AuthorizeResponse {
                username: account.username,
                role: account.role,
                token: issued.token,
                expire: issued.expires_at,
            },
        ),
        Ok(None) => ApiResponse::forbidden(id, TOO_MANY_REQUESTS),
        Err(e) => fault(id, e),
    }
}

/// Revoke the caller's token
async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse<()> {
    let id = current_id(&headers);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.tokens.revoke(authorization).await {
        Ok(true) => ApiResponse::success_empty(id),
        Ok(false) => ApiResponse::failure(id, 400, "Logout failed"),
        Err(e) => fault(id, e),
    }
}

/// Send a verification code to an email address
async fn ask_code_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<AskCodeQuery>, QueryRejection>,
) -> ApiResponse<()> {
    let id = current_id(&headers);
    let Ok(Query(query)) = query else {
        return ApiResponse::failure(id, 400, "Invalid request parameters");
    };
    if !is_plausible_email(&query.email) {
        return ApiResponse::failure(id, 400, "Invalid request parameters");
    }

    let address = super::middleware::client_address(connect.as_ref());
    match state
        .verification
        .ask_code(query.kind, &query.email, &address)
        .await
    {
        Ok(AskOutcome::Sent) => ApiResponse::success_empty(id),
        Ok(AskOutcome::Throttled) => {
            state.metrics.record_throttled("verify_code");
            ApiResponse::forbidden(id, TOO_MANY_REQUESTS)
        }
        Err(e) => fault(id, e),
    }
}

/// Check a verification code
async fn verify_code_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> ApiResponse<()> {
    let id = current_id(&headers);
    let Ok(Json(request)) = request else {
        return ApiResponse::failure(id, 400, "Invalid request parameters");
    };

    match state
        .verification
        .confirm(&request.email, &request.code)
        .await
    {
        Ok(check) => match check.message() {
            None => ApiResponse::success_empty(id),
            Some(message) => ApiResponse::failure(id, 400, message),
        },
        Err(e) => fault(id, e),
    }
}

/// Identity of the authenticated caller
async fn me_handler(
    headers: HeaderMap,
    identity: Option<Extension<Identity>>,
) -> ApiResponse<Identity> {
    let id = current_id(&headers);
    match identity {
        Some(Extension(identity)) => ApiResponse::success(id, identity),
        None => ApiResponse::unauthorized(id, "Authentication required"),
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}
