//! In-flight call coalescing over the cache store.
//!
//! [`Coalescer::coalesce`] wraps an expensive async operation behind a cache
//! key. Concurrent callers for the same not-yet-cached key share a single
//! execution: the first caller runs the operation, everyone else registers as
//! a waiter and receives the same settled value or the same error. Successful
//! results are written back to the [`CacheStore`] with the caller's TTL.
//!
//! The in-flight registry is a plain mutex-guarded map; every
//! check-and-insert and remove-and-drain happens in one critical section, so
//! for any key at most one execution is outstanding at any instant.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::backend::CacheError;
use crate::store::CacheStore;

/// Boxed error type produced by wrapped operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the in-flight execution hands to each waiter.
type SharedOutcome = Result<serde_json::Value, SharedFailure>;

/// Failure forms that fan out to every concurrent caller.
#[derive(Clone)]
enum SharedFailure {
    Upstream(Arc<BoxError>),
    Codec(Arc<serde_json::Error>),
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for coalesced calls.
#[derive(Debug, thiserror::Error)]
pub enum CoalesceError {
    /// The cache store read or write failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The wrapped operation failed. Every caller sharing the execution
    /// receives the same underlying error.
    #[error("Wrapped operation failed: {0}")]
    Upstream(Arc<BoxError>),

    /// A result could not be re-encoded while fanning out between callers.
    #[error("Coalesced value codec failure: {0}")]
    Codec(Arc<serde_json::Error>),

    /// The caller that was executing the operation went away before it
    /// settled. The in-flight record has been cleared; retrying is safe.
    #[error("Coalesced call was abandoned before settling")]
    Abandoned,
}

// ---------------------------------------------------------------------------
// Coalescer
// ---------------------------------------------------------------------------

/// Shared mediator ensuring at most one in-flight execution per cache key.
pub struct Coalescer {
    store: CacheStore,
    enabled: bool,
    inflight: Mutex<HashMap<String, Vec<oneshot::Sender<SharedOutcome>>>>,
}

/// How a call participates in the execution for its key.
enum Role {
    Leader,
    Waiter(oneshot::Receiver<SharedOutcome>),
}

impl Coalescer {
    /// Create a coalescer over `store`. When `enabled` is false the cache is
    /// bypassed entirely; coalescing of concurrent calls still applies.
    pub fn new(store: CacheStore, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` behind `key`, memoizing its result and collapsing concurrent
    /// callers into one execution.
    ///
    /// Resolution order: cached entry (when enabled) → join an in-flight
    /// execution for `key` → become the execution. On success the value is
    /// written back with `ttl`; on failure all concurrent callers receive the
    /// same error and the in-flight record is cleared so a later call can
    /// retry.
    pub async fn coalesce<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        op: F,
    ) -> Result<T, CoalesceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        if self.enabled {
            if let Some(hit) = self.store.get::<T>(key).await? {
                tracing::trace!(key, "Cache hit");
                return Ok(hit);
            }
        }

        match self.join_or_lead(key) {
            Role::Waiter(rx) => {
                tracing::trace!(key, "Joining in-flight call");
                Self::await_shared(rx).await
            }
            Role::Leader => self.lead(key, ttl, op).await,
        }
    }

    /// Evict one cache key, or a whole prefix when `key` ends with `*`.
    ///
    /// No-op when caching is disabled (there is nothing to evict).
    pub async fn invalidate(&self, key: &str) -> Result<(), CoalesceError> {
        if !self.enabled {
            return Ok(());
        }
        self.store.del_cache(key).await?;
        Ok(())
    }

    /// Evict every cache key starting with `prefix`, optionally keeping keys
    /// that contain the exclusion substring.
    pub async fn invalidate_prefix(
        &self,
        prefix: &str,
        exclude: Option<&str>,
    ) -> Result<(), CoalesceError> {
        if !self.enabled {
            return Ok(());
        }
        self.store.del_by_prefix(prefix, exclude).await?;
        Ok(())
    }

    /// Atomically either register a new in-flight record for `key` (becoming
    /// the leader) or append a waiter to the existing one.
    fn join_or_lead(&self, key: &str) -> Role {
        let mut inflight = self.lock_inflight();
        match inflight.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Role::Waiter(rx)
            }
            None => {
                inflight.insert(key.to_string(), Vec::new());
                Role::Leader
            }
        }
    }

    /// Execute the wrapped operation and settle every registered waiter.
    async fn lead<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, op: F) -> Result<T, CoalesceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        // If this future is dropped before settling, the guard clears the
        // in-flight record so waiters are released and a retry can lead.
        let guard = FlightGuard {
            coalescer: self,
            key,
            settled: false,
        };

        match op().await {
            Ok(value) => match serde_json::to_value(&value) {
                Ok(json) => {
                    guard.settle(Ok(json));
                    if self.enabled {
                        self.store.set(key, &value, ttl).await?;
                    }
                    Ok(value)
                }
                Err(e) => {
                    let shared = Arc::new(e);
                    guard.settle(Err(SharedFailure::Codec(shared.clone())));
                    Err(CoalesceError::Codec(shared))
                }
            },
            Err(e) => {
                let shared = Arc::new(e);
                guard.settle(Err(SharedFailure::Upstream(shared.clone())));
                Err(CoalesceError::Upstream(shared))
            }
        }
    }

    /// Receive the outcome of the execution this caller joined.
    async fn await_shared<T: DeserializeOwned>(
        rx: oneshot::Receiver<SharedOutcome>,
    ) -> Result<T, CoalesceError> {
        match rx.await {
            Ok(Ok(json)) => {
                serde_json::from_value(json).map_err(|e| CoalesceError::Codec(Arc::new(e)))
            }
            Ok(Err(SharedFailure::Upstream(e))) => Err(CoalesceError::Upstream(e)),
            Ok(Err(SharedFailure::Codec(e))) => Err(CoalesceError::Codec(e)),
            Err(_) => Err(CoalesceError::Abandoned),
        }
    }

    /// Remove the in-flight record for `key`, returning its waiters.
    fn remove_waiters(&self, key: &str) -> Vec<oneshot::Sender<SharedOutcome>> {
        self.lock_inflight().remove(key).unwrap_or_default()
    }

    fn lock_inflight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<oneshot::Sender<SharedOutcome>>>> {
        // Nothing panics while holding this lock; poisoning cannot occur.
        self.inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Clears the in-flight record for a key once its execution settles, or on
/// the way out if the executing future is dropped early.
struct FlightGuard<'a> {
    coalescer: &'a Coalescer,
    key: &'a str,
    settled: bool,
}

impl FlightGuard<'_> {
    /// Remove the record and hand `outcome` to every waiter. Waiters that
    /// stopped listening are skipped silently.
    fn settle(mut self, outcome: SharedOutcome) {
        self.settled = true;
        for waiter in self.coalescer.remove_waiters(self.key) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            // Dropping the senders releases every waiter with a recv error.
            drop(self.coalescer.remove_waiters(self.key));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;
    use crate::backends::memory::MemoryBackend;

    fn coalescer(enabled: bool) -> Arc<Coalescer> {
        let store = CacheStore::new(Arc::new(MemoryBackend::new()), "test");
        Arc::new(Coalescer::new(store, enabled))
    }

    /// Spawn `n` concurrent coalesced calls for `key`, all incrementing
    /// `calls` and resolving to `value` after a short delay.
    async fn fan_out(
        coalescer: &Arc<Coalescer>,
        key: &str,
        n: usize,
        calls: &Arc<AtomicU32>,
        value: u32,
    ) -> Vec<Result<u32, CoalesceError>> {
        let mut handles = Vec::new();
        for _ in 0..n {
            let coalescer = Arc::clone(coalescer);
            let calls = Arc::clone(calls);
            let key = key.to_string();
            handles.push(tokio::spawn(async move {
                coalescer
                    .coalesce(&key, None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, BoxError>(value)
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("task panicked"));
        }
        results
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        let results = fan_out(&coalescer, "report:2024", 5, &calls, 42).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), 42);
        }
    }

    #[tokio::test]
    async fn settled_result_is_served_from_cache() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        fan_out(&coalescer, "report:2024", 2, &calls, 7).await;

        // After settlement and within TTL the cache answers; the operation
        // must not run again.
        let value: u32 = coalescer
            .coalesce("report:2024", Some(Duration::from_secs(60)), || async {
                panic!("operation must not be invoked on a cache hit")
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_cache_still_coalesces() {
        let coalescer = coalescer(false);
        let calls = Arc::new(AtomicU32::new(0));

        let results = fan_out(&coalescer, "k", 4, &calls, 9).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.into_iter().all(|r| r.unwrap() == 9));

        // Nothing was cached, so a later call executes again.
        fan_out(&coalescer, "k", 1, &calls, 9).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_waiters_receive_the_same_error() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                coalescer
                    .coalesce::<u32, _, _>("boom", None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<u32, BoxError>("upstream exploded".into())
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_matches!(err, CoalesceError::Upstream(_));
            assert!(err.to_string().contains("upstream exploded"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_call_clears_the_record_so_retry_executes() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let result = coalescer
            .coalesce::<u32, _, _>("flaky", None, || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Err::<u32, BoxError>("first attempt fails".into())
            })
            .await;
        assert!(result.is_err());

        // The failure was not cached and the in-flight record is gone.
        let calls_clone = Arc::clone(&calls);
        let value = coalescer
            .coalesce("flaky", None, || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(11u32)
            })
            .await
            .unwrap();

        assert_eq!(value, 11);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_a_fresh_execution() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        coalescer
            .coalesce("short", Some(Duration::from_millis(20)), || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(1u32)
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls_clone = Arc::clone(&calls);
        coalescer
            .coalesce("short", Some(Duration::from_millis(20)), || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(2u32)
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_evicts_the_cached_entry() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        fan_out(&coalescer, "user:1", 1, &calls, 5).await;
        coalescer.invalidate("user:1").await.unwrap();
        fan_out(&coalescer, "user:1", 1, &calls, 5).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_prefix_spares_excluded_keys() {
        let coalescer = coalescer(true);
        let calls = Arc::new(AtomicU32::new(0));

        fan_out(&coalescer, "user:1", 1, &calls, 1).await;
        fan_out(&coalescer, "user:admin", 1, &calls, 2).await;

        coalescer
            .invalidate_prefix("user:", Some("user:admin"))
            .await
            .unwrap();

        // user:1 was evicted, user:admin survived.
        fan_out(&coalescer, "user:1", 1, &calls, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        fan_out(&coalescer, "user:admin", 1, &calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandoned_leader_releases_waiters() {
        let coalescer = coalescer(true);

        let leader_coalescer = Arc::clone(&coalescer);
        let leader = tokio::spawn(async move {
            leader_coalescer
                .coalesce::<u32, _, _>("slow", None, || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, BoxError>(1u32)
                })
                .await
        });

        // Let the leader register, then join as a waiter.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter_coalescer = Arc::clone(&coalescer);
        let waiter = tokio::spawn(async move {
            waiter_coalescer
                .coalesce::<u32, _, _>("slow", None, || async {
                    panic!("waiter must not become a second execution")
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let err = waiter.await.unwrap().unwrap_err();
        assert_matches!(err, CoalesceError::Abandoned);

        // The record was cleared, so a fresh call executes normally.
        let value = coalescer
            .coalesce("slow", None, || async { Ok::<_, BoxError>(3u32) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }
}
