//! The durable queue storage contract.
//!
//! Storage is at-least-once and ordered best-effort: delayed jobs and
//! redeliveries re-enter the queue behind their due time, so strict FIFO is
//! not guaranteed. Retry is a storage-level policy fixed at enqueue time;
//! the dispatcher never re-invokes a handler that already signalled success.

use std::time::Duration;

use async_trait::async_trait;

use relay_core::types::DbId;

use crate::job::{JobEnvelope, QueuedJob};

/// Total delivery attempts permitted per job: the first delivery plus one
/// automatic redelivery.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 2;

/// Fixed delay before a failed job becomes due for redelivery.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(3000);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for durable queue storage failures.
#[derive(Debug, thiserror::Error)]
pub enum QueueStoreError {
    /// The backing database rejected or failed an operation.
    #[error("Queue storage error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backing store is unreachable.
    #[error("Queue storage unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Options / outcomes
// ---------------------------------------------------------------------------

/// Durability options applied when a job is enqueued.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Delay before the job first becomes due. `None` means immediately.
    pub delay: Option<Duration>,
    /// Total delivery attempts permitted (first delivery included).
    pub max_attempts: u32,
    /// Fixed backoff delay applied before each redelivery.
    pub backoff: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: None,
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            backoff: RETRY_BACKOFF,
        }
    }
}

/// What the store decided to do with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// A redelivery was scheduled after the backoff delay.
    Retrying,
    /// Attempts are exhausted (or retry was not permitted). The record is
    /// retained in the failed state for inspection.
    Terminal,
}

// ---------------------------------------------------------------------------
// QueueStore
// ---------------------------------------------------------------------------

/// Object-safe contract over the durable queue backend.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a job, returning its storage id.
    async fn enqueue(
        &self,
        envelope: &JobEnvelope,
        opts: &EnqueueOptions,
    ) -> Result<DbId, QueueStoreError>;

    /// Claim the next due job, if any. A claimed job is invisible to other
    /// workers until it is completed or failed.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueStoreError>;

    /// Remove a completed job's record. Completed jobs are not retained.
    async fn complete(&self, id: DbId) -> Result<(), QueueStoreError>;

    /// Record a failed delivery.
    ///
    /// With `allow_retry` and attempts remaining, the job is rescheduled
    /// after its backoff delay; otherwise it is marked failed and retained.
    async fn fail(
        &self,
        id: DbId,
        reason: &str,
        allow_retry: bool,
    ) -> Result<FailOutcome, QueueStoreError>;
}
