//! Job data model: what producers submit, what the store holds, and what a
//! failure looks like by the time a handler hears about it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use relay_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// JobEnvelope
// ---------------------------------------------------------------------------

/// The unit of work submitted to the dispatcher.
///
/// Identifies its target handler by `service_name`; the payload is opaque to
/// the dispatcher and interpreted only by that handler. Immutable once
/// enqueued.
///
/// Constructed via [`JobEnvelope::new`] and enriched with
/// [`with_delay`](JobEnvelope::with_delay) and
/// [`with_additional_info`](JobEnvelope::with_additional_info).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Registry name of the handler that should execute this job.
    pub service_name: String,

    /// Handler-defined payload.
    pub payload: serde_json::Value,

    /// Optional side-channel data carried alongside the payload.
    pub additional_info: Option<serde_json::Value>,

    /// Visibility delay requested at submission; applied by the store, so a
    /// dequeued job always reads `None` here.
    pub delay: Option<Duration>,
}

impl JobEnvelope {
    /// Create an envelope for `service_name` with the given payload.
    pub fn new(service_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            service_name: service_name.into(),
            payload,
            additional_info: None,
            delay: None,
        }
    }

    /// Delay visibility of the job by `delay` after enqueue.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach side-channel data for the handler.
    pub fn with_additional_info(mut self, info: serde_json::Value) -> Self {
        self.additional_info = Some(info);
        self
    }
}

// ---------------------------------------------------------------------------
// QueuedJob
// ---------------------------------------------------------------------------

/// A job claimed from durable storage for execution.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Storage id of the durable record.
    pub id: DbId,
    /// The envelope as submitted.
    pub envelope: JobEnvelope,
    /// When the job was enqueued (UTC).
    pub enqueued_at: Timestamp,
    /// 1-based delivery attempt this claim represents.
    pub attempt: u32,
}

// ---------------------------------------------------------------------------
// Failure reporting
// ---------------------------------------------------------------------------

/// Why a job failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailureReason {
    /// The durable store was unreachable at submit time.
    #[error("Failed to enqueue job: {0}")]
    EnqueueFailed(String),

    /// No handler was registered under the job's service name at dequeue
    /// time.
    #[error("Handler not found for service \"{0}\"")]
    HandlerNotFound(String),

    /// The handler's `execute` returned an error.
    #[error("Handler execution failed: {0}")]
    ExecutionFailed(String),
}

/// What a handler's `on_failed` receives.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Why the job failed.
    pub reason: FailureReason,

    /// Whether a durable record of the job exists. `false` only for jobs
    /// that could never be enqueued; such failures are synthesized at submit
    /// time and there is no stored record to inspect.
    pub persisted: bool,
}

impl JobFailure {
    /// A failure of a job that exists in durable storage.
    pub fn persisted(reason: FailureReason) -> Self {
        Self {
            reason,
            persisted: true,
        }
    }

    /// A failure synthesized before the job ever reached storage.
    pub fn never_persisted(reason: FailureReason) -> Self {
        Self {
            reason,
            persisted: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SubmitOutcome
// ---------------------------------------------------------------------------

/// Result of a submit call.
///
/// Submission never raises: an enqueue failure is reported through the
/// handler's `on_failed`, and the submitter only learns the broad outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The job is durably queued under the given storage id.
    Enqueued(DbId),
    /// Enqueue failed; the failure was routed through the failure path.
    Failed,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
