//! The job dispatcher: durable submission plus the worker loop.
//!
//! [`Dispatcher::submit`] persists a [`JobEnvelope`]; the worker loop claims
//! due jobs, resolves their handler through the [`HandlerRegistry`], and runs
//! each one in its own task, bounded by a semaphore sized to downstream
//! capacity. Completion removes the durable record; terminal failure retains
//! it and notifies the handler. [`Dispatcher::drain_and_stop`] stops new
//! claims and waits for everything in flight.
//!
//! Submission never raises to the caller: an enqueue failure is synthesized
//! into the same `on_failed` path a dequeued job would take, so producers
//! observe failures uniformly through their handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::job::{FailureReason, JobEnvelope, JobFailure, QueuedJob, SubmitOutcome};
use crate::registry::HandlerRegistry;
use crate::store::{EnqueueOptions, FailOutcome, QueueStore};

/// Default number of concurrently executing jobs. Matches the database
/// connection pool size so executing handlers cannot starve each other of
/// connections.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Default delay between polls when the queue is empty.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunable parameters for the worker loop and retry policy.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum simultaneously executing jobs.
    pub concurrency: usize,
    /// How long to sleep when the queue has nothing due.
    pub poll_interval: Duration,
    /// Total delivery attempts per job (first delivery included).
    pub max_attempts: u32,
    /// Fixed backoff before a redelivery becomes due.
    pub retry_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: crate::store::MAX_DELIVERY_ATTEMPTS,
            retry_backoff: crate::store::RETRY_BACKOFF,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Durable job submission and worker-loop execution.
///
/// Created once at startup via [`Dispatcher::new`]; the returned `Arc` is
/// cheap to clone into anything that submits jobs.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Dispatcher {
    /// Create a dispatcher over `store`, resolving handlers via `registry`.
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<HandlerRegistry>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Arc::new(Self {
            store,
            registry,
            config,
            semaphore,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Durably enqueue a job.
    ///
    /// On enqueue failure nothing is raised here: the failure is reported
    /// through the handler's `on_failed` with `persisted == false`, and the
    /// caller sees [`SubmitOutcome::Failed`].
    pub async fn submit(&self, envelope: JobEnvelope) -> SubmitOutcome {
        let opts = EnqueueOptions {
            delay: envelope.delay,
            max_attempts: self.config.max_attempts,
            backoff: self.config.retry_backoff,
        };

        match self.store.enqueue(&envelope, &opts).await {
            Ok(id) => {
                tracing::debug!(job_id = id, service = %envelope.service_name, "Job enqueued");
                SubmitOutcome::Enqueued(id)
            }
            Err(e) => {
                let failure =
                    JobFailure::never_persisted(FailureReason::EnqueueFailed(e.to_string()));
                self.notify_failed(&envelope, &failure).await;
                SubmitOutcome::Failed
            }
        }
    }

    /// Spawn the worker loop. Call once, and only in worker mode.
    pub fn start(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        self.tasks.spawn(async move { dispatcher.run().await });
    }

    /// Stop claiming new jobs, wait for in-flight executions to finish.
    ///
    /// Running handlers are never interrupted; this only closes the intake.
    pub async fn drain_and_stop(&self) {
        tracing::info!("Draining queue worker");
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Queue worker drained");
    }

    /// The dequeue loop: claim a concurrency permit, claim a job, spawn its
    /// execution. Exits when cancelled.
    async fn run(self: Arc<Self>) {
        tracing::info!(
            concurrency = self.config.concurrency,
            "Queue worker started"
        );

        loop {
            // Hold a permit before claiming so a claimed job never waits in
            // memory behind the concurrency limit.
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Let the claim run to completion even when a drain begins; a
            // job that was dequeued must be processed, not dropped.
            let claimed = self.store.dequeue().await;

            match claimed {
                Ok(Some(job)) => {
                    let dispatcher = Arc::clone(&self);
                    self.tasks.spawn(async move {
                        dispatcher.process(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if self.idle_wait().await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to poll the queue");
                    if self.idle_wait().await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Queue worker stopped dequeuing");
    }

    /// Sleep one poll interval. Returns true if cancelled while sleeping.
    async fn idle_wait(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    /// Run one claimed job through resolve → execute → settle.
    async fn process(&self, job: QueuedJob) {
        let QueuedJob {
            id,
            envelope,
            attempt,
            ..
        } = job;

        tracing::info!(
            job_id = id,
            service = %envelope.service_name,
            attempt,
            "Executing job"
        );

        let Some(handler) = self.registry.resolve(&envelope.service_name).await else {
            // Unresolvable service: failed without retry, record retained.
            let reason = FailureReason::HandlerNotFound(envelope.service_name.clone());
            if let Err(e) = self.store.fail(id, &reason.to_string(), false).await {
                tracing::error!(job_id = id, error = %e, "Failed to mark job failed");
            }
            self.notify_failed(&envelope, &JobFailure::persisted(reason)).await;
            return;
        };

        match handler.execute(&envelope).await {
            Ok(()) => {
                // Fire-and-forget retention: completed jobs are not kept.
                if let Err(e) = self.store.complete(id).await {
                    tracing::error!(job_id = id, error = %e, "Failed to remove completed job");
                }
                if let Err(e) = handler.on_completed(&envelope).await {
                    tracing::error!(
                        job_id = id,
                        service = %envelope.service_name,
                        error = %e,
                        "on_completed callback raised"
                    );
                }
                tracing::info!(job_id = id, service = %envelope.service_name, "Job completed");
            }
            Err(e) => {
                tracing::error!(
                    job_id = id,
                    service = %envelope.service_name,
                    attempt,
                    error = %e,
                    "Job execution failed"
                );
                let reason = FailureReason::ExecutionFailed(e.to_string());
                match self.store.fail(id, &reason.to_string(), true).await {
                    Ok(FailOutcome::Retrying) => {
                        tracing::warn!(job_id = id, "Redelivery scheduled");
                    }
                    Ok(FailOutcome::Terminal) => {
                        self.notify_failed(&envelope, &JobFailure::persisted(reason))
                            .await;
                    }
                    Err(store_err) => {
                        tracing::error!(
                            job_id = id,
                            error = %store_err,
                            "Failed to record job failure"
                        );
                        self.notify_failed(&envelope, &JobFailure::persisted(reason))
                            .await;
                    }
                }
            }
        }
    }

    /// Route a failure to the handler's `on_failed`, when one is registered.
    /// Callback errors are logged and swallowed.
    async fn notify_failed(&self, envelope: &JobEnvelope, failure: &JobFailure) {
        tracing::error!(
            service = %envelope.service_name,
            reason = %failure.reason,
            persisted = failure.persisted,
            "Job failed"
        );

        if let Some(handler) = self.registry.resolve(&envelope.service_name).await {
            if let Err(e) = handler.on_failed(envelope, failure).await {
                tracing::error!(
                    service = %envelope.service_name,
                    error = %e,
                    "on_failed callback raised"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
