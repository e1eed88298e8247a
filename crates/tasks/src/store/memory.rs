//! Process-local progress store.

use super::ProgressStore;
use crate::error::TaskResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory store with lazy expiry.
///
/// Expiry uses `tokio::time::Instant`, so tests can advance a paused clock.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        entries.get(key).filter(|e| e.expires_at > Instant::now())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, key: &str) -> TaskResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        let value = Self::live(&entries, key).map(|e| e.value.clone());
        if value.is_none() {
            entries.remove(key);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> TaskResult<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> TaskResult<bool> {
        let mut entries = self.entries.lock().await;
        if !Self::live(&entries, key).is_some_and(|e| e.value == expected) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: new.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> TaskResult<bool> {
        let mut entries = self.entries.lock().await;
        let existed = Self::live(&entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn scan(&self, prefix: &str) -> TaskResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> TaskResult<()> {
        Ok(())
    }
}
