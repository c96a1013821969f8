//! Counter store trait
//!
//! The counter store is the only mutable state shared between requests. Every
//! operation touches exactly one key and is atomic on its own; nothing in the
//! crate relies on multi-key transactions.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// Key-value store with atomic counters and per-key expiry
///
/// Values are strings. Counters are decimal integers stored under a key and
/// mutated with [`CounterStore::increment`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the name of this store backend
    fn name(&self) -> &str;

    /// Reads the value under `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`, replacing any previous value and TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increments the counter under `key` and returns the new value
    ///
    /// An absent key is created with value 1 and no expiry.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Sets the remaining lifetime of an existing key
    ///
    /// Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Checks whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remaining lifetime of `key`
    ///
    /// `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}
