//! The raw key/value backend contract.
//!
//! A backend stores already-serialized string values under exact keys and
//! knows nothing about environment namespacing or JSON; that is
//! [`CacheStore`](crate::store::CacheStore)'s job. Implementations live in
//! [`backends`](crate::backends).

use std::time::Duration;

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for cache store and backend failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing Redis service rejected or failed a command.
    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value could not be decoded as JSON.
    #[error("Cache value for key \"{key}\" is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded to JSON before storage.
    #[error("Failed to serialize value for cache key \"{key}\": {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// CacheBackend
// ---------------------------------------------------------------------------

/// Object-safe contract over the key/value service backing the cache.
///
/// Keys arrive fully namespaced. `pattern` arguments are glob-style with a
/// single trailing `*`; that is the only pattern form the store ever issues.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read the raw value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`. A `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Delete the entry under `key`. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// List every key matching a trailing-`*` glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}
