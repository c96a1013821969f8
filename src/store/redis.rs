//! Redis-backed counter store
//!
//! Suitable for multi-instance deployments: every instance sees the same
//! counters, block markers and revocation entries. Each command runs under a
//! client-side timeout so a stalled connection surfaces as an error instead of
//! hanging the request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::error::StoreError;

use super::traits::CounterStore;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix prepended to every key
    pub prefix: String,
    /// Per-command timeout
    pub command_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "authgate:".to_string(),
            command_timeout: Duration::from_millis(500),
        }
    }
}

/// Redis counter store
pub struct RedisStore {
    config: RedisStoreConfig,
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis and verifies the connection with `PING`
    pub async fn connect(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client");
            StoreError::Connection(e.to_string())
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            warn!(error = %e, "Failed to create Redis connection manager");
            StoreError::Connection(e.to_string())
        })?;

        let store = Self { config, connection };

        let pong: String = store.run(redis::cmd("PING")).await?;
        debug!(reply = %pong, url = %store.config.url, "Connected to Redis");

        Ok(store)
    }

    /// Returns the key prefix
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, StoreError> {
        let mut conn = self.connection.clone();
        self.with_timeout(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let limit = self.config.command_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    // PX/PEXPIRE reject zero
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.make_key(key));
        self.run(cmd).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.make_key(key))
            .arg(value)
            .arg("PX")
            .arg(millis(ttl));
        let _: () = self.run(cmd).await?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(self.make_key(key));
        self.run(cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(self.make_key(key)).arg(millis(ttl));
        let updated: i64 = self.run(cmd).await?;
        Ok(updated == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.make_key(key));
        let count: i64 = self.run(cmd).await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.make_key(key));
        let _: i64 = self.run(cmd).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(self.make_key(key));
        // -2: absent, -1: no expiry
        let remaining: i64 = self.run(cmd).await?;
        Ok((remaining >= 0).then(|| Duration::from_millis(remaining as u64)))
    }
}
