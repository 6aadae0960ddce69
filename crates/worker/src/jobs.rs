//! Built-in maintenance job handler.
//!
//! Jobs for this service carry a `job_type` discriminator in their payload;
//! [`MaintenanceJob`] is the typed form. Unknown or malformed payloads are
//! logged and treated as processed: they would fail identically on every
//! redelivery, so retrying them buys nothing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_queue::{HandlerError, JobEnvelope, JobHandler};

use crate::auth::TokenService;

/// Registry name of the maintenance handler.
pub const MAINTENANCE_SERVICE: &str = "MaintenanceJobs";

// ---------------------------------------------------------------------------
// Job payloads
// ---------------------------------------------------------------------------

/// Typed payload of a maintenance job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job_type", content = "data")]
pub enum MaintenanceJob {
    /// Write a revocation mark for each user, invalidating their
    /// previously issued tokens.
    RevokeUserTokens { user_ids: Vec<String> },
}

impl MaintenanceJob {
    /// Wrap this job in an envelope addressed to the maintenance handler.
    pub fn into_envelope(self) -> JobEnvelope {
        // Serializing a plain-data enum cannot fail.
        let payload = serde_json::to_value(&self).unwrap_or(serde_json::Value::Null);
        JobEnvelope::new(MAINTENANCE_SERVICE, payload)
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Executes [`MaintenanceJob`]s against the token service.
pub struct MaintenanceJobs {
    tokens: Arc<TokenService>,
}

impl MaintenanceJobs {
    /// Create the handler. Register the result under its own name.
    pub fn new(tokens: Arc<TokenService>) -> Arc<Self> {
        Arc::new(Self { tokens })
    }
}

#[async_trait]
impl JobHandler for MaintenanceJobs {
    fn name(&self) -> &str {
        MAINTENANCE_SERVICE
    }

    async fn execute(&self, job: &JobEnvelope) -> Result<(), HandlerError> {
        let parsed: MaintenanceJob = match serde_json::from_value(job.payload.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = %job.payload,
                    "Ignoring unrecognized maintenance job"
                );
                return Ok(());
            }
        };

        match parsed {
            MaintenanceJob::RevokeUserTokens { user_ids } => {
                for user_id in &user_ids {
                    // A cache outage here fails the job so it is redelivered.
                    self.tokens.expire_token(user_id).await?;
                }
                tracing::info!(count = user_ids.len(), "Revoked user tokens");
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
