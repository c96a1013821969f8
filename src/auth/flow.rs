//! Per-address request gate
//!
//! Fixed-window counting keyed by client address, with a separate block
//! marker once the window overflows. Decisions for one address are serialized.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{keys, CounterStore};

use super::locks::KeyedLocks;
use super::ratelimit::FlowLimiter;

/// Limits for the request gate
#[derive(Debug, Clone)]
pub struct FlowGateConfig {
    /// Requests permitted per period
    pub limit: u32,
    /// Counting window
    pub period: Duration,
    /// Block applied once the limit is exceeded
    pub block: Duration,
}

impl Default for FlowGateConfig {
    fn default() -> Self {
        Self {
            limit: 20,
            period: Duration::from_secs(3),
            block: Duration::from_secs(30),
        }
    }
}

/// Request gate keyed by client address
pub struct FlowGate {
    limiter: FlowLimiter,
    locks: KeyedLocks,
    config: FlowGateConfig,
}

impl FlowGate {
    pub fn new(store: Arc<dyn CounterStore>, config: FlowGateConfig) -> Self {
        Self {
            limiter: FlowLimiter::new(store),
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Count one request from `address`; `false` means refuse it
    pub async fn try_count(&self, address: &str) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(address).await;

        self.limiter
            .limit_period(
                &keys::key(keys::FLOW_LIMIT_COUNTER, address),
                &keys::key(keys::FLOW_LIMIT_BLOCK, address),
                self.config.block,
                self.config.limit,
                self.config.period,
            )
            .await
    }
}
