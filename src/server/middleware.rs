//! Pipeline stages
//!
//! Each stage is an axum middleware function over [`AppState`]:
//! - CORS response headers
//! - Per-address flow limiting
//! - Bearer token resolution
//! - Request/response logging

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::auth::{TokenManager, Verdict};
use crate::config::{CorsConfig, RequestLogConfig};
use crate::models::response::TOO_MANY_REQUESTS;
use crate::models::{ApiResponse, Identity};

use super::request_id::current_id;
use super::router::{fault, AppState};

/// Methods advertised when the configured list is a wildcard
const ALL_METHODS: &str = "GET, HEAD, POST, PUT, DELETE, OPTIONS, TRACE, PATCH";

const ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// Upper bound for buffering a response body for the log snippet
const MAX_LOGGED_BODY: usize = 4 * 1024 * 1024;

/// Address of the remote peer, "unknown" without connect info
pub fn client_address(connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// CORS headers added to every response
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: String,
    methods: String,
    credentials: bool,
}

impl CorsPolicy {
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            origin: config.origin.clone(),
            methods: config.methods.clone(),
            credentials: config.credentials,
        }
    }

    /// Write the CORS headers for a request carrying `origin`
    ///
    /// A wildcard origin echoes the request's `Origin`; with no `Origin`
    /// header there is nothing to echo and Allow-Origin is left out.
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let allow_origin = if self.origin == "*" {
            origin.cloned()
        } else {
            HeaderValue::from_str(&self.origin).ok()
        };
        if let Some(value) = allow_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }

        let methods = if self.methods == "*" {
            ALL_METHODS
        } else {
            self.methods.as_str()
        };
        if let Ok(value) = HeaderValue::from_str(methods) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
        }

        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );

        if self.credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

/// Which requests get logged and how much of the body
#[derive(Debug, Clone)]
pub struct RequestLogPolicy {
    ignore: Vec<String>,
    snippet_length: usize,
}

impl RequestLogPolicy {
    pub fn new(config: &RequestLogConfig) -> Self {
        Self {
            ignore: config.ignore.clone(),
            snippet_length: config.snippet_length,
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// First `snippet_length` characters of a body, lossily decoded
    pub fn snippet(&self, body: &[u8]) -> String {
        String::from_utf8_lossy(body)
            .chars()
            .take(self.snippet_length)
            .collect()
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Add CORS headers to whatever the inner stages produce
///
/// Preflight requests are answered here with an empty 200.
pub async fn cors_stage(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();

    let mut response = if is_preflight(&request) {
        ().into_response()
    } else {
        next.run(request).await
    };

    state.cors.apply(origin.as_ref(), response.headers_mut());
    response
}

/// Count the request against its address and refuse floods
pub async fn flow_limit_stage(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let id = current_id(request.headers());
    let address = client_address(connect.as_ref());

    match state.flow_gate.try_count(&address).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            debug!(request_id = id, address = %address, "Flow limit exceeded");
            state.metrics.record_throttled("flow_limit");
            ApiResponse::<()>::forbidden(id, TOO_MANY_REQUESTS).into_response()
        }
        Err(e) => fault::<()>(id, e).into_response(),
    }
}

/// Resolve a bearer token into an [`Identity`] extension
///
/// A bad or revoked token does not fail the request; it continues anonymous
/// and the handler decides whether that is acceptable. The resolved identity
/// is also attached to the response so outer stages can see who was served.
pub async fn token_stage(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(authorization) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };

    let id = current_id(request.headers());
    let identity = match state.tokens.verify(&authorization).await {
        Ok(Verdict::Valid(claims)) => {
            let identity = TokenManager::to_identity(&claims);
            debug!(request_id = id, identity = %identity, "Token accepted");
            request.extensions_mut().insert(identity.clone());
            Some(identity)
        }
        Ok(Verdict::Rejected(reason)) => {
            debug!(request_id = id, reason = %reason, "Token rejected");
            state.metrics.record_token_rejection(reason);
            None
        }
        Err(e) => return fault::<()>(id, e).into_response(),
    };

    let mut response = next.run(request).await;
    if let Some(identity) = identity {
        response.extensions_mut().insert(identity);
    }
    response
}

/// Log each request and its outcome
///
/// Sits outside the flow limit and token stages, so refusals are logged and
/// the caller is read from the response once those stages have run.
pub async fn request_log_stage(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if state.request_log.is_ignored(&path) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let id = current_id(request.headers());
    let method = request.method().clone();
    let params = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();

    info!(
        request_id = id,
        method = %method,
        path = %path,
        params = ?params,
        address = %client_address(connect.as_ref()),
        "Request received"
    );

    let response = next.run(request).await;
    let status = response.status();
    let caller = response
        .extensions()
        .get::<Identity>()
        .map(ToString::to_string)
        .unwrap_or_else(|| "anonymous".to_string());
    let (parts, body) = response.into_parts();

    let body = match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(request_id = id, error = %e, "Failed to read response body");
            return ApiResponse::<()>::internal(id).into_response();
        }
    };

    let elapsed = start.elapsed();
    let outcome = if status == StatusCode::OK {
        state.request_log.snippet(&body)
    } else {
        format!("{} Error", status.as_u16())
    };

    info!(
        request_id = id,
        status = status.as_u16(),
        caller = %caller,
        duration_ms = elapsed.as_millis() as u64,
        outcome = %outcome,
        "Request completed"
    );
    state.metrics.record_request(status.as_u16());
    state.metrics.record_request_duration(elapsed.as_secs_f64());

    Response::from_parts(parts, Body::from(body))
}
