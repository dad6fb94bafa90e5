use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CounterIncrement, CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    value: u64,
    expires_at: Instant,
}

/// Process-local counters for development and single-instance deployments.
/// Expiry mirrors Redis: an expired key reads as absent.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Redis does this itself; here the host runs it on an interval.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        debug!(
            removed = before - entries.len(),
            "completed in-memory counter cleanup"
        );
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get_counts(&self, keys: &[String]) -> Result<Vec<u64>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|key| match entries.get(key) {
                Some(entry) if entry.expires_at > now => entry.value,
                _ => 0,
            })
            .collect())
    }

    async fn increment_all(&self, increments: &[CounterIncrement]) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        for increment in increments {
            let expires_at = now + increment.ttl;
            entries
                .entry(increment.key.clone())
                .and_modify(|entry| {
                    if entry.expires_at <= now {
                        entry.value = 0;
                    }
                    entry.value += 1;
                    entry.expires_at = expires_at;
                })
                .or_insert(MemoryEntry {
                    value: 1,
                    expires_at,
                });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_keys_read_as_zero() {
        let store = InMemoryCounterStore::new();
        let counts = store
            .get_counts(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(counts, vec![0, 0]);
    }

    #[tokio::test]
    async fn increments_accumulate_per_key() {
        let store = InMemoryCounterStore::new();
        let ttl = Duration::from_secs(60);
        let both = [
            CounterIncrement::new("a".to_string(), ttl),
            CounterIncrement::new("b".to_string(), ttl),
        ];
        store.increment_all(&both).await.unwrap();
        store.increment_all(&both[..1]).await.unwrap();

        let counts = store
            .get_counts(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(counts, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn expired_keys_restart_from_zero() {
        let store = InMemoryCounterStore::new();
        let short = [CounterIncrement::new("k".to_string(), Duration::from_millis(1))];
        store.increment_all(&short).await.unwrap();
        store.increment_all(&short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.get_counts(&["k".to_string()]).await.unwrap(), vec![0]);

        let long = [CounterIncrement::new("k".to_string(), Duration::from_secs(60))];
        store.increment_all(&long).await.unwrap();
        assert_eq!(store.get_counts(&["k".to_string()]).await.unwrap(), vec![1]);

        store.cleanup().await;
        assert_eq!(store.get_counts(&["k".to_string()]).await.unwrap(), vec![1]);
    }
}
