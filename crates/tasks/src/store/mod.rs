//! Shared key-value stores holding task progress records.

pub mod memory;
pub mod redis;

use crate::error::TaskResult;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryProgressStore;
pub use self::redis::RedisProgressStore;

/// A key-value store with per-key TTL and compare-and-swap.
///
/// Values are opaque strings. Every write replaces the key's TTL.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Get a live value.
    async fn get(&self, key: &str) -> TaskResult<Option<String>>;

    /// Unconditionally write a value.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> TaskResult<()>;

    /// Replace the value only if it still equals `expected`.
    ///
    /// Returns `false`, leaving the key untouched, when the key is gone or
    /// holds something else.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> TaskResult<bool>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> TaskResult<bool>;

    /// List live keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> TaskResult<Vec<String>>;

    fn backend_name(&self) -> &'static str;

    /// Check that the store is reachable.
    async fn health_check(&self) -> TaskResult<()>;
}
