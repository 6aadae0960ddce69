//! Durable job dispatch.
//!
//! A producer builds a [`job::JobEnvelope`] naming a target handler and hands
//! it to the [`dispatcher::Dispatcher`], which persists it in a
//! [`store::QueueStore`] and, in worker mode, pulls jobs back out and routes
//! each one to the matching [`registry::JobHandler`]. Completion and failure
//! are reported back to the handler through its callbacks, never to the
//! submitter.

pub mod dispatcher;
pub mod job;
pub mod memory;
pub mod pg;
pub mod registry;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use job::{FailureReason, JobEnvelope, JobFailure, QueuedJob, SubmitOutcome};
pub use memory::{JobStatus, MemoryQueueStore};
pub use pg::{create_pool, run_migrations, DbPool, PgQueueStore};
pub use registry::{HandlerError, HandlerRegistry, JobHandler};
pub use store::{EnqueueOptions, FailOutcome, QueueStore, QueueStoreError};
