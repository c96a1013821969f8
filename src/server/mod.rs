//! HTTP server components for authgate
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - The ordered request pipeline and its stages
//! - Server lifecycle management

pub mod middleware;
pub mod pipeline;
pub mod request_id;
pub mod router;

pub use middleware::{client_address, CorsPolicy, RequestLogPolicy};
pub use pipeline::{Pipeline, Stage};
pub use request_id::{current_id, SnowflakeIds, REQUEST_ID_HEADER};
pub use router::{build_router, AppState, HealthResponse};

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::ServerConfig;

/// Routes wrapped in the pipeline
pub fn build_app(state: AppState, pipeline: &Pipeline) -> Router {
    pipeline.apply(build_router(state.clone()), &state)
}

/// The authgate HTTP listener
///
/// Owns the fully assembled application; `run` binds the configured address,
/// `serve` takes a listener bound elsewhere.
pub struct Server {
    config: ServerConfig,
    app: Router,
}

impl Server {
    /// Assemble the pipeline around the routes
    pub fn new(config: ServerConfig, state: AppState, pipeline: &Pipeline) -> Self {
        Self {
            config,
            app: build_app(state, pipeline),
        }
    }

    /// Address from config; an unparsable host falls back to 0.0.0.0
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// Peer addresses are exposed to the pipeline through `ConnectInfo`.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("Failed to bind listener: {0}")]
    Bind(String),

    /// Accept loop failed
    #[error("Serve failed: {0}")]
    Serve(String),
}
