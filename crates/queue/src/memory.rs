//! In-process queue storage.
//!
//! Implements the full [`QueueStore`] contract (due times, claim
//! invisibility, retry scheduling, failed-record retention) against a
//! mutex-guarded map. Used by unit tests and storage-less local runs; the
//! inspection helpers exist so tests can assert on record state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use relay_core::types::DbId;

use crate::job::{JobEnvelope, QueuedJob};
use crate::store::{EnqueueOptions, FailOutcome, QueueStore, QueueStoreError};

/// Lifecycle state of a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to become due and be claimed.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Terminally failed; retained for inspection.
    Failed,
}

struct StoredJob {
    envelope: JobEnvelope,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    backoff: Duration,
    available_at: Instant,
    enqueued_at: relay_core::types::Timestamp,
    last_error: Option<String>,
}

#[derive(Default)]
struct State {
    next_id: DbId,
    jobs: HashMap<DbId, StoredJob>,
}

/// In-memory implementation of [`QueueStore`].
#[derive(Default)]
pub struct MemoryQueueStore {
    state: Mutex<State>,
    fail_enqueues: AtomicBool,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `enqueue` calls fail as if storage were unreachable.
    pub fn set_fail_enqueues(&self, fail: bool) {
        self.fail_enqueues.store(fail, Ordering::SeqCst);
    }

    /// Number of records currently held, in any state.
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    /// Lifecycle state of a record, if it exists.
    pub async fn status_of(&self, id: DbId) -> Option<JobStatus> {
        self.state.lock().await.jobs.get(&id).map(|job| job.status)
    }

    /// Delivery attempts consumed by a record, if it exists.
    pub async fn attempts_of(&self, id: DbId) -> Option<u32> {
        self.state.lock().await.jobs.get(&id).map(|job| job.attempts)
    }

    /// Last recorded failure reason of a record, if any.
    pub async fn last_error_of(&self, id: DbId) -> Option<String> {
        self.state
            .lock()
            .await
            .jobs
            .get(&id)
            .and_then(|job| job.last_error.clone())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(
        &self,
        envelope: &JobEnvelope,
        opts: &EnqueueOptions,
    ) -> Result<DbId, QueueStoreError> {
        if self.fail_enqueues.load(Ordering::SeqCst) {
            return Err(QueueStoreError::Unavailable(
                "memory store configured to reject enqueues".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;

        let delay = opts.delay.unwrap_or(Duration::ZERO);
        state.jobs.insert(
            id,
            StoredJob {
                envelope: JobEnvelope {
                    delay: None,
                    ..envelope.clone()
                },
                status: JobStatus::Queued,
                attempts: 0,
                max_attempts: opts.max_attempts,
                backoff: opts.backoff,
                available_at: Instant::now() + delay,
                enqueued_at: chrono::Utc::now(),
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueStoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        // Lowest id first for best-effort FIFO.
        let due = state
            .jobs
            .iter()
            .filter(|(_, job)| job.status == JobStatus::Queued && job.available_at <= now)
            .map(|(id, _)| *id)
            .min();

        let Some(id) = due else {
            return Ok(None);
        };

        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueStoreError::Unavailable("claimed job vanished".to_string()))?;
        job.status = JobStatus::Running;
        job.attempts += 1;

        Ok(Some(QueuedJob {
            id,
            envelope: job.envelope.clone(),
            enqueued_at: job.enqueued_at,
            attempt: job.attempts,
        }))
    }

    async fn complete(&self, id: DbId) -> Result<(), QueueStoreError> {
        self.state.lock().await.jobs.remove(&id);
        Ok(())
    }

    async fn fail(
        &self,
        id: DbId,
        reason: &str,
        allow_retry: bool,
    ) -> Result<FailOutcome, QueueStoreError> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(FailOutcome::Terminal);
        };

        job.last_error = Some(reason.to_string());

        if allow_retry && job.attempts < job.max_attempts {
            job.status = JobStatus::Queued;
            job.available_at = Instant::now() + job.backoff;
            Ok(FailOutcome::Retrying)
        } else {
            job.status = JobStatus::Failed;
            Ok(FailOutcome::Terminal)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
