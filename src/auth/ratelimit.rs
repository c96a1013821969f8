//! Counter-store rate limiter
//!
//! Three throttling strategies share one counting routine:
//!
//! - single-action cooldown: one action per cooldown window
//! - escalating cooldown: a few actions per window, then a longer lockout
//! - fixed-window counting: N events per window, then a separate block marker
//!
//! The routine reads the counter, increments it, and re-arms the TTL when the
//! increment shows the key was recreated in between. The two commands are not
//! a transaction; under heavy concurrency the TTL refresh may be skipped or
//! repeated, which only blurs the window edge and never changes whether a
//! given call exceeded the limit. Callers serialize calls per identity with
//! [`super::locks::KeyedLocks`] when the decision also writes a second key.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::StoreError;
use crate::store::CounterStore;

/// Side effect applied when a count is observed
#[derive(Debug, Clone, PartialEq)]
enum LimitAction<'a> {
    /// Refuse once over the limit
    Deny,
    /// Refuse once over the limit and re-arm the key with a longer TTL
    Escalate { ttl: Duration },
    /// Refuse once over the limit and set a separate block marker
    Block { block_key: &'a str, ttl: Duration },
}

/// Rate limiter over a shared counter store
pub struct FlowLimiter {
    store: Arc<dyn CounterStore>,
}

impl FlowLimiter {
    /// Create a limiter backed by `store`
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Single-action cooldown
    ///
    /// The first call for a fresh key succeeds and arms the key for
    /// `cool_down`; every call while the key exists fails.
    pub async fn limit_once(&self, key: &str, cool_down: Duration) -> Result<bool, StoreError> {
        self.internal_check(key, 1, cool_down, LimitAction::Deny)
            .await
    }

    /// Escalating cooldown
    ///
    /// Permits `frequency` calls within `base`; the next call fails and
    /// re-arms the key for `upgrade`, so sustained retries keep extending the
    /// lockout.
    pub async fn limit_once_upgrade(
        &self,
        key: &str,
        frequency: u32,
        base: Duration,
        upgrade: Duration,
    ) -> Result<bool, StoreError> {
        self.internal_check(key, frequency, base, LimitAction::Escalate { ttl: upgrade })
            .await
    }

    /// Fixed-window counting
    ///
    /// Counts events under `counter_key` for `period`. Exceeding `frequency`
    /// sets `block_key` for `block` and fails. A live block marker fails the
    /// call without touching the counter.
    pub async fn limit_period(
        &self,
        counter_key: &str,
        block_key: &str,
        block: Duration,
        frequency: u32,
        period: Duration,
    ) -> Result<bool, StoreError> {
        if self.store.exists(block_key).await? {
            return Ok(false);
        }
        self.internal_check(
            counter_key,
            frequency,
            period,
            LimitAction::Block {
                block_key,
                ttl: block,
            },
        )
        .await
    }

    async fn internal_check(
        &self,
        key: &str,
        frequency: u32,
        period: Duration,
        action: LimitAction<'_>,
    ) -> Result<bool, StoreError> {
        let Some(count) = self.store.get(key).await? else {
            self.store.set_with_ttl(key, "1", period).await?;
            return Ok(true);
        };

        let previous: i64 = count
            .parse()
            .map_err(|_| StoreError::Corrupt(key.to_string()))?;
        let value = self.store.increment(key).await?;
        if value != previous + 1 {
            // Key expired between GET and INCR and came back without a TTL
            self.store.expire(key, period).await?;
        }

        let overclock = value > i64::from(frequency);
        if overclock {
            debug!(key = %key, count = value, limit = frequency, "Rate limit exceeded");
            match action {
                LimitAction::Deny => {}
                LimitAction::Escalate { ttl } => {
                    self.store.set_with_ttl(key, &value.to_string(), ttl).await?;
                }
                LimitAction::Block { block_key, ttl } => {
                    self.store.set_with_ttl(block_key, "", ttl).await?;
                }
            }
        }

        Ok(!overclock)
    }
}
