//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authgate::auth::{hash_password, Account, LogMailSender, StaticAccounts};
use authgate::config::{Config, ServerConfig};
use authgate::error::StoreError;
use authgate::otel::Metrics;
use authgate::server::{AppState, Pipeline, Server};
use authgate::store::{CounterStore, MemoryStore};
use tokio::net::TcpListener;

pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Test configuration with a signing key
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.jwt.key = "integration-test-secret".to_string();
    config
}

/// Account directory with alice (user) and root (admin)
pub fn create_test_accounts() -> Arc<StaticAccounts> {
    let hash = hash_password(TEST_PASSWORD).expect("Failed to hash password");
    Arc::new(StaticAccounts::new(vec![
        Account {
            id: "1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: hash.clone(),
            role: "user".to_string(),
        },
        Account {
            id: "2".to_string(),
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password_hash: hash,
            role: "admin".to_string(),
        },
    ]))
}

/// Application state over the given store
pub fn create_test_state_with(config: &Config, store: Arc<dyn CounterStore>) -> AppState {
    AppState::from_config(
        config,
        store,
        create_test_accounts(),
        Arc::new(LogMailSender),
        Arc::new(Metrics::noop()),
    )
}

/// Application state over a fresh in-memory store
pub fn create_test_state(config: &Config) -> AppState {
    create_test_state_with(config, Arc::new(MemoryStore::new()))
}

/// Run the full pipeline in the background and return the address
/// The server shuts down when the returned sender is dropped or sent
pub async fn run_test_server(
    state: AppState,
) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let server = Server::new(config, state, &Pipeline::standard());

    tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    (addr, shutdown_tx)
}

/// Log in and return the bearer header value
pub async fn login(client: &reqwest::Client, addr: SocketAddr, username: &str) -> String {
    let body: serde_json::Value = client
        .post(format!("http://{}/api/auth/login", addr))
        .json(&serde_json::json!({"username": username, "password": TEST_PASSWORD}))
        .send()
        .await
        .expect("Login request failed")
        .json()
        .await
        .expect("Login response is not JSON");

    format!(
        "Bearer {}",
        body["data"]["token"].as_str().expect("No token in login response")
    )
}

/// Counter store whose every command fails
pub struct OutageStore;

impl OutageStore {
    fn refused() -> StoreError {
        StoreError::Connection("connection refused".to_string())
    }
}

#[async_trait]
impl CounterStore for OutageStore {
    fn name(&self) -> &str {
        "outage"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(Self::refused())
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(Self::refused())
    }

    async fn increment(&self, _key: &str) -> Result<i64, StoreError> {
        Err(Self::refused())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(Self::refused())
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(Self::refused())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(Self::refused())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        Err(Self::refused())
    }
}
