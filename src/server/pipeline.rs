//! Ordered request pipeline
//!
//! Stages carry a fixed order key; lower keys run earlier on the way in and
//! later on the way out. The request id and trace layers always wrap the
//! whole pipeline so every stage can log the id.

use axum::{body::Body, http::Request, middleware::from_fn_with_state, Router};
use std::sync::Arc;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug_span, Span};

use super::middleware::{cors_stage, flow_limit_stage, request_log_stage, token_stage};
use super::request_id::{MakeSnowflakeId, REQUEST_ID_HEADER};
use super::router::AppState;

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Cors,
    RequestLog,
    FlowLimit,
    Token,
}

impl Stage {
    /// Order key; lower runs first
    ///
    /// The request log sits just inside CORS so it sees flow limit refusals
    /// and the identity resolved by the token stage.
    pub fn order(self) -> i32 {
        match self {
            Stage::Cors => -103,
            Stage::RequestLog => -102,
            Stage::FlowLimit => -101,
            Stage::Token => -100,
        }
    }
}

/// Set of enabled stages
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// All four stages
    pub fn standard() -> Self {
        Self::new()
            .with(Stage::Cors)
            .with(Stage::RequestLog)
            .with(Stage::FlowLimit)
            .with(Stage::Token)
    }

    pub fn with(mut self, stage: Stage) -> Self {
        if !self.stages.contains(&stage) {
            self.stages.push(stage);
        }
        self
    }

    pub fn without(mut self, stage: Stage) -> Self {
        self.stages.retain(|s| *s != stage);
        self
    }

    /// Enabled stages in execution order
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = self.stages.clone();
        stages.sort_by_key(|s| s.order());
        stages
    }

    /// Wrap `router` with the enabled stages
    pub fn apply(&self, router: Router, state: &AppState) -> Router {
        // The last layer added is the outermost, so add from the highest key down
        let router = self
            .stages()
            .into_iter()
            .rev()
            .fold(router, |router, stage| {
                let state = state.clone();
                match stage {
                    Stage::Cors => router.layer(from_fn_with_state(state, cors_stage)),
                    Stage::FlowLimit => router.layer(from_fn_with_state(state, flow_limit_stage)),
                    Stage::Token => router.layer(from_fn_with_state(state, token_stage)),
                    Stage::RequestLog => {
                        router.layer(from_fn_with_state(state, request_log_stage))
                    }
                }
            });

        router
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeSnowflakeId::new(
                Arc::clone(&state.request_ids),
            )))
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!(
        "http-request",
        method = %request.method(),
        path = request.uri().path(),
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LogMailSender, StaticAccounts};
    use crate::config::Config;
    use crate::otel::Metrics;
    use crate::server::build_app;
    use crate::store::MemoryStore;
    use axum::http::{header, StatusCode};
    use serde_json::Value;
    use std::io::Write;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn create_test_state(flow_limit: u32) -> AppState {
        let mut config = Config::default();
        config.jwt.key = "pipeline-test-secret".to_string();
        config.flow.limit = flow_limit;

        AppState::from_config(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticAccounts::new(vec![])),
            Arc::new(LogMailSender),
            Arc::new(Metrics::noop()),
        )
    }

    fn health_request() -> Request<Body> {
        Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap()
    }

    // Test 1: Standard pipeline runs stages by order key
    #[test]
    fn test_standard_order() {
        assert_eq!(
            Pipeline::standard().stages(),
            vec![Stage::Cors, Stage::RequestLog, Stage::FlowLimit, Stage::Token]
        );
    }

    // Test 2: Insertion order does not matter
    #[test]
    fn test_insertion_order_ignored() {
        let pipeline = Pipeline::new()
            .with(Stage::Token)
            .with(Stage::RequestLog)
            .with(Stage::Cors);

        assert_eq!(
            pipeline.stages(),
            vec![Stage::Cors, Stage::RequestLog, Stage::Token]
        );
    }

    // Test 3: Stages are deduplicated and removable
    #[test]
    fn test_with_without() {
        let pipeline = Pipeline::standard()
            .with(Stage::Token)
            .without(Stage::FlowLimit);

        assert_eq!(
            pipeline.stages(),
            vec![Stage::Cors, Stage::RequestLog, Stage::Token]
        );
        assert!(Pipeline::new().stages().is_empty());
    }

    // Test 4: CORS wraps the flow limit refusal
    #[tokio::test]
    async fn test_cors_outside_flow_limit() {
        let app = build_app(create_test_state(1), &Pipeline::standard());

        let response = app.clone().oneshot(health_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(health_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    // Test 5: Removing a stage leaves the others in place
    #[tokio::test]
    async fn test_without_stages() {
        let pipeline = Pipeline::standard()
            .without(Stage::Cors)
            .without(Stage::FlowLimit);
        let app = build_app(create_test_state(1), &pipeline);

        for _ in 0..3 {
            let response = app.clone().oneshot(health_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
            assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        }
    }

    // Test 6: Order keys are distinct and ascending
    #[test]
    fn test_order_keys() {
        assert!(Stage::Cors.order() < Stage::RequestLog.order());
        assert!(Stage::RequestLog.order() < Stage::FlowLimit.order());
        assert!(Stage::FlowLimit.order() < Stage::Token.order());
    }

    #[derive(Clone, Default)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        /// Captured JSON events that carry the given message
        fn events(&self, message: &str) -> Vec<Value> {
            let buffer = self.buffer.lock().unwrap();
            String::from_utf8_lossy(&buffer)
                .lines()
                .filter_map(|line| serde_json::from_str::<Value>(line).ok())
                .filter(|event| event["fields"]["message"] == message)
                .collect()
        }
    }

    impl Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_subscriber(capture: &CaptureWriter) -> impl tracing::Subscriber + Send + Sync {
        let writer = capture.clone();
        tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish()
    }

    fn me_request(token: Option<&str>) -> Request<Body> {
        let builder = Request::builder().uri("/api/user/me?page=2");
        let builder = match token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        };
        builder.body(Body::empty()).unwrap()
    }

    // Test 7: Request log records caller, snippet and refusals
    #[tokio::test]
    async fn test_request_log_records_outcomes() {
        let capture = CaptureWriter::default();
        let _guard = tracing::subscriber::set_default(capture_subscriber(&capture));

        let state = create_test_state(3);
        let issued = state
            .tokens
            .issue("7", "bob", &["admin".to_string()])
            .await
            .unwrap()
            .unwrap();
        let app = build_app(state, &Pipeline::standard());

        let response = app.clone().oneshot(me_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app
            .clone()
            .oneshot(me_request(Some(&issued.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(me_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.oneshot(me_request(Some(&issued.token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let received = capture.events("Request received");
        assert_eq!(received.len(), 4);
        assert_eq!(received[0]["fields"]["path"], "/api/user/me");
        assert!(received[0]["fields"]["params"]
            .as_str()
            .unwrap()
            .contains("page"));

        let completed = capture.events("Request completed");
        assert_eq!(completed.len(), 4);

        assert_eq!(completed[0]["fields"]["status"], 401);
        assert_eq!(completed[0]["fields"]["outcome"], "401 Error");
        assert_eq!(completed[0]["fields"]["caller"], "anonymous");

        assert_eq!(completed[1]["fields"]["status"], 200);
        let snippet = completed[1]["fields"]["outcome"].as_str().unwrap();
        assert!(snippet.contains("\"subject_name\":\"bob\""));
        assert!(completed[1]["fields"]["caller"]
            .as_str()
            .unwrap()
            .starts_with("bob"));

        assert_eq!(completed[3]["fields"]["status"], 403);
        assert_eq!(completed[3]["fields"]["outcome"], "403 Error");
        assert_eq!(completed[3]["fields"]["caller"], "anonymous");
    }

    // Test 8: Ignored paths are not logged even when refused
    #[tokio::test]
    async fn test_request_log_skips_ignored_paths() {
        let capture = CaptureWriter::default();
        let _guard = tracing::subscriber::set_default(capture_subscriber(&capture));

        let app = build_app(create_test_state(1), &Pipeline::standard());

        let response = app.clone().oneshot(health_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(health_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert!(capture.events("Request received").is_empty());
        assert!(capture.events("Request completed").is_empty());

        let response = app.oneshot(me_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(capture.events("Request completed").len(), 1);
    }
}
