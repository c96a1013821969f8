//! Per-identity lock registry
//!
//! Serializes the read-increment-decide sequence for one identity without a
//! global lock. Entries are created on demand and evicted when the last holder
//! or waiter lets go.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of async mutexes keyed by identity string
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyedLocks {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`
    ///
    /// The returned guard releases the lock when dropped. Dropping the future
    /// before it resolves gives up the place in the queue.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            SlotRef {
                locks: self,
                key: key.to_string(),
                slot: Arc::clone(slots.entry(key.to_string()).or_default()),
            }
        };

        let guard = Arc::clone(&slot.slot).lock_owned().await;

        KeyGuard { guard, slot }
    }

    /// Number of identities currently holding or waiting for a lock
    pub fn tracked_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A holder's or waiter's reference to one entry
///
/// The last reference to go evicts the entry, whether or not it ever got
/// the lock.
struct SlotRef<'a> {
    locks: &'a KeyedLocks,
    key: String,
    slot: Slot,
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let registered = slots
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot));
        // One reference in the map, one here: nobody else holds or waits
        if registered && Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

/// Exclusive access to one identity
pub struct KeyGuard<'a> {
    // Dropped before `slot` so the owned guard's clone is gone by then
    guard: OwnedMutexGuard<()>,
    slot: SlotRef<'a>,
}

impl KeyGuard<'_> {
    /// The identity this guard protects
    pub fn key(&self) -> &str {
        &self.slot.key
    }
}
