//! The serialization and namespacing front over a cache backend.
//!
//! Every key is prefixed with the deployment environment (`{env}:{key}`) so
//! entries written by different environments sharing one Redis never collide.
//! Values round-trip through JSON; a missing key reads as `Ok(None)`, never
//! as a decode error.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{CacheBackend, CacheError};

/// TTL-capable key/value store with environment-scoped keys.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    env: String,
}

impl CacheStore {
    /// Create a store over `backend`, scoping all keys to `env`.
    pub fn new(backend: Arc<dyn CacheBackend>, env: impl Into<String>) -> Self {
        Self {
            backend,
            env: env.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.env, key)
    }

    /// Read and deserialize the value stored under `key`.
    ///
    /// A missing key yields `Ok(None)`. A present but non-JSON value is a
    /// [`CacheError::Decode`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let full_key = self.namespaced(key);
        match self.backend.get(&full_key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|source| CacheError::Decode {
                    key: full_key,
                    source,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and store `value` under `key`. `None` TTL means no expiry.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let full_key = self.namespaced(key);
        let raw = serde_json::to_string(value).map_err(|source| CacheError::Encode {
            key: full_key.clone(),
            source,
        })?;
        self.backend.set(&full_key, &raw, ttl).await
    }

    /// Delete the entry under `key`.
    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.backend.del(&self.namespaced(key)).await
    }

    /// Delete every key starting with `prefix`.
    ///
    /// When `exclude` is given, matching keys that contain the exclusion
    /// substring anywhere in their (namespaced) name are left in place.
    pub async fn del_by_prefix(
        &self,
        prefix: &str,
        exclude: Option<&str>,
    ) -> Result<(), CacheError> {
        let pattern = format!("{}*", self.namespaced(prefix));
        let keys = self.backend.keys(&pattern).await?;

        for key in keys {
            if exclude.is_some_and(|excl| key.contains(excl)) {
                continue;
            }
            self.backend.del(&key).await?;
        }
        Ok(())
    }

    /// Delete by exact key, or by prefix when `key` ends with `*`.
    pub async fn del_cache(&self, key: &str) -> Result<(), CacheError> {
        match key.strip_suffix('*') {
            Some(prefix) => self.del_by_prefix(prefix, None).await,
            None => self.del(key).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::backends::memory::MemoryBackend;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Report {
        rows: u32,
        title: String,
    }

    fn store_with_backend() -> (CacheStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (CacheStore::new(backend.clone(), "test"), backend)
    }

    #[tokio::test]
    async fn values_round_trip_through_json() {
        let (store, _) = store_with_backend();
        let report = Report {
            rows: 3,
            title: "daily".to_string(),
        };

        store.set("report:1", &report, None).await.unwrap();
        let loaded: Option<Report> = store.get("report:1").await.unwrap();
        assert_eq!(loaded, Some(report));
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let (store, _) = store_with_backend();
        let loaded: Option<Report> = store.get("absent").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn keys_are_environment_namespaced() {
        let (store, backend) = store_with_backend();
        store.set("token:1", &42u32, None).await.unwrap();

        // The raw backend sees the env-prefixed key, not the logical one.
        assert!(backend.get("test:token:1").await.unwrap().is_some());
        assert!(backend.get("token:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_key_different_env_does_not_collide() {
        let backend = Arc::new(MemoryBackend::new());
        let dev = CacheStore::new(backend.clone(), "dev");
        let prod = CacheStore::new(backend.clone(), "prod");

        dev.set("k", &1u32, None).await.unwrap();
        prod.set("k", &2u32, None).await.unwrap();

        assert_eq!(dev.get::<u32>("k").await.unwrap(), Some(1));
        assert_eq!(prod.get::<u32>("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_decode_error() {
        let (store, backend) = store_with_backend();
        backend.set("test:bad", "{not json", None).await.unwrap();

        let result = store.get::<Report>("bad").await;
        assert_matches!(result, Err(CacheError::Decode { .. }));
    }

    #[tokio::test]
    async fn del_removes_only_the_exact_key() {
        let (store, _) = store_with_backend();
        store.set("user:1", &1u32, None).await.unwrap();
        store.set("user:10", &10u32, None).await.unwrap();

        store.del("user:1").await.unwrap();

        assert_eq!(store.get::<u32>("user:1").await.unwrap(), None);
        assert_eq!(store.get::<u32>("user:10").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn del_by_prefix_removes_all_matches() {
        let (store, _) = store_with_backend();
        store.set("user:1", &1u32, None).await.unwrap();
        store.set("user:2", &2u32, None).await.unwrap();
        store.set("order:1", &3u32, None).await.unwrap();

        store.del_by_prefix("user:", None).await.unwrap();

        assert_eq!(store.get::<u32>("user:1").await.unwrap(), None);
        assert_eq!(store.get::<u32>("user:2").await.unwrap(), None);
        assert_eq!(store.get::<u32>("order:1").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn del_by_prefix_honors_exclusion_substring() {
        let (store, _) = store_with_backend();
        store.set("user:1", &1u32, None).await.unwrap();
        store.set("user:admin:1", &2u32, None).await.unwrap();
        store.set("user:admin:2", &3u32, None).await.unwrap();

        store.del_by_prefix("user:", Some("user:admin")).await.unwrap();

        assert_eq!(store.get::<u32>("user:1").await.unwrap(), None);
        assert_eq!(store.get::<u32>("user:admin:1").await.unwrap(), Some(2));
        assert_eq!(store.get::<u32>("user:admin:2").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn del_cache_routes_wildcard_to_prefix_delete() {
        let (store, _) = store_with_backend();
        store.set("report:2024", &1u32, None).await.unwrap();
        store.set("report:2025", &2u32, None).await.unwrap();

        store.del_cache("report:*").await.unwrap();

        assert_eq!(store.get::<u32>("report:2024").await.unwrap(), None);
        assert_eq!(store.get::<u32>("report:2025").await.unwrap(), None);
    }

    #[tokio::test]
    async fn del_cache_without_wildcard_is_exact() {
        let (store, _) = store_with_backend();
        store.set("report:2024", &1u32, None).await.unwrap();
        store.set("report:2025", &2u32, None).await.unwrap();

        store.del_cache("report:2024").await.unwrap();

        assert_eq!(store.get::<u32>("report:2024").await.unwrap(), None);
        assert_eq!(store.get::<u32>("report:2025").await.unwrap(), Some(2));
    }
}
