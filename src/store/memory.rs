//! In-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// TTL-aware store backed by a concurrent map. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .filter(|r| r.value().is_live())
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining lifetime of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.inner.get(key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn live(&self, key: &str) -> Option<String> {
        let entry = self.inner.get(key)?;
        if entry.is_live() {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.inner.remove_if(key, |_, e| !e.is_live());
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.inner.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_exists() {
        let store = MemoryStore::new();
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get_or("k", "fallback").await.unwrap(), "fallback");

        store.set("k", "v".into(), None).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.ttl("k").is_none());
    }

    #[tokio::test]
    async fn expired_entries_disappear() {
        let store = MemoryStore::new();
        store
            .set("short", "v".into(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store
            .set("long", "v".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert!(!store.exists("short").await.unwrap());
        assert_eq!(store.keys(), vec!["long".to_string()]);
        assert!(store.ttl("long").unwrap() > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn clones_share_data() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.set("k", "v".into(), None).await.unwrap();
        assert!(clone.exists("k").await.unwrap());
    }
}
