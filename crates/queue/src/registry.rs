//! Handler registration and resolution.
//!
//! Handlers are registered once at startup and resolved concurrently from
//! worker tasks. The registry is an explicit object injected into the
//! dispatcher at construction and shared via `Arc`; there is no process-wide
//! singleton.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::job::{JobEnvelope, JobFailure};

/// Boxed error type returned across the handler boundary.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// JobHandler
// ---------------------------------------------------------------------------

/// A named unit of business logic the dispatcher routes jobs to.
///
/// `execute` is expected to interpret the payload itself and to catch and log
/// whatever it can handle internally; an error returned from `execute` marks
/// the job failed. The completion/failure callbacks are observational: any
/// error they return is logged and swallowed by the dispatcher.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Registry name this handler serves.
    fn name(&self) -> &str;

    /// Execute one job.
    async fn execute(&self, job: &JobEnvelope) -> Result<(), HandlerError>;

    /// Called after the job's durable record has been removed.
    async fn on_completed(&self, _job: &JobEnvelope) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called when the job has terminally failed, or could never be enqueued.
    async fn on_failed(
        &self,
        _job: &JobEnvelope,
        _failure: &JobFailure,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Name-to-handler mapping with last-writer-wins registration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own name, overwriting any previous
    /// registration for that name.
    pub async fn register(&self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        let previous = self.handlers.write().await.insert(name.clone(), handler);
        if previous.is_some() {
            tracing::warn!(service = %name, "Handler registration replaced an existing handler");
        } else {
            tracing::debug!(service = %name, "Handler registered");
        }
    }

    /// Resolve the handler registered under `name`, if any.
    pub async fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    /// Number of registered handlers.
    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Whether no handlers are registered.
    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    /// Test handler that stamps `marker` into a shared cell when executed.
    struct NamedHandler {
        name: &'static str,
        marker: u32,
        seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for NamedHandler {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _job: &JobEnvelope) -> Result<(), HandlerError> {
            self.seen.store(self.marker, Ordering::SeqCst);
            Ok(())
        }
    }

    fn handler(name: &'static str, marker: u32, seen: &Arc<AtomicU32>) -> Arc<NamedHandler> {
        Arc::new(NamedHandler {
            name,
            marker,
            seen: Arc::clone(seen),
        })
    }

    #[tokio::test]
    async fn resolve_returns_registered_handler() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(AtomicU32::new(0));
        registry.register(handler("Billing", 1, &seen)).await;

        let resolved = registry.resolve("Billing").await;
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().name(), "Billing");
    }

    #[tokio::test]
    async fn resolve_unknown_name_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("Nobody").await.is_none());
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(AtomicU32::new(0));

        registry.register(handler("Billing", 1, &seen)).await;
        registry.register(handler("Billing", 2, &seen)).await;

        assert_eq!(registry.len().await, 1);

        let resolved = registry.resolve("Billing").await.unwrap();
        let job = JobEnvelope::new("Billing", serde_json::Value::Null);
        resolved.execute(&job).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_registry_reports_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
    }
}
