//! Counter store backends
//!
//! All cross-request state (counters, block markers, revocation entries,
//! verification codes) lives behind the [`CounterStore`] trait. Redis is the
//! production backend; the in-memory store serves development and tests.

pub mod keys;
pub mod traits;

mod memory;
mod redis;

pub use traits::CounterStore;

#[cfg(test)]
pub use traits::MockCounterStore;

pub use self::redis::{RedisStore, RedisStoreConfig};
pub use memory::MemoryStore;
