//! Shared counter store.
//!
//! The only mutable state shared between API replicas. Values are plain
//! integers with TTL-based expiry; keys are never deleted explicitly. Every
//! call from the limiter goes through [`ResilientCounterStore`], which owns the
//! timeout and the fail-open policy.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;
pub mod resilient;

pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use resilient::ResilientCounterStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store backend error: {0}")]
    Backend(String),
    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("counter store returned {actual} values for {expected} keys")]
    ShortRead { expected: usize, actual: usize },
}

/// One atomic `+1` plus TTL (re)arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterIncrement {
    pub key: String,
    pub ttl: Duration,
}

impl CounterIncrement {
    pub fn new(key: String, ttl: Duration) -> Self {
        Self { key, ttl }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read several counters in one round trip. Missing or expired keys read as 0.
    async fn get_counts(&self, keys: &[String]) -> Result<Vec<u64>, StoreError>;

    /// Increment every key by one and set its TTL, pipelined in one round trip.
    async fn increment_all(&self, increments: &[CounterIncrement]) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
