//! In-process cache storage.
//!
//! Used when no Redis host is configured, and as the backend for unit tests.
//! Expiry is lazy: an entry past its deadline is treated as absent and
//! removed on the next access that touches it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{CacheBackend, CacheError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory implementation of [`CacheBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let backend = MemoryBackend::new();
        backend
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entry_within_ttl_still_readable() {
        let backend = MemoryBackend::new();
        backend
            .set("k", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn del_removes_entry() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        backend.del("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn del_missing_key_is_ok() {
        let backend = MemoryBackend::new();
        assert!(backend.del("absent").await.is_ok());
    }

    #[tokio::test]
    async fn keys_matches_prefix_only() {
        let backend = MemoryBackend::new();
        backend.set("user:1", "a", None).await.unwrap();
        backend.set("user:2", "b", None).await.unwrap();
        backend.set("order:1", "c", None).await.unwrap();

        let mut keys = backend.keys("user:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn keys_skips_expired_entries() {
        let backend = MemoryBackend::new();
        backend
            .set("user:1", "a", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        backend.set("user:2", "b", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let keys = backend.keys("user:*").await.unwrap();
        assert_eq!(keys, vec!["user:2"]);
    }
}
