//! Durable key-value store boundary.
//!
//! Every write is a full overwrite with its own TTL. The store offers no
//! cross-key transactions, and unavailability is always reported as
//! `StoreError::Unavailable`, never as an empty result.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod r#trait;

pub use in_memory::InMemoryKvStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKvStore;
pub use r#trait::{KvStore, StoreError, StoreLimits};
