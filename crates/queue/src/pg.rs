//! PostgreSQL-backed queue storage.
//!
//! One `queued_jobs` row per submitted job. Dequeue claims the next due row
//! with `FOR UPDATE SKIP LOCKED`, so any number of workers can pull from the
//! same table without handing one job to two of them. Submit delay and retry
//! backoff both go through `available_at`.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use relay_core::types::DbId;

use crate::job::{JobEnvelope, QueuedJob};
use crate::store::{EnqueueOptions, FailOutcome, QueueStore, QueueStoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply this crate's migrations (the `queued_jobs` table).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(pool).await
}

/// Column list for queued_jobs rows returned to the dispatcher.
const JOB_COLUMNS: &str = "id, service_name, payload, additional_info, attempts, enqueued_at";

#[derive(sqlx::FromRow)]
struct QueuedJobRow {
    id: DbId,
    service_name: String,
    payload: serde_json::Value,
    additional_info: Option<serde_json::Value>,
    attempts: i32,
    enqueued_at: relay_core::types::Timestamp,
}

impl From<QueuedJobRow> for QueuedJob {
    fn from(row: QueuedJobRow) -> Self {
        QueuedJob {
            id: row.id,
            envelope: JobEnvelope {
                service_name: row.service_name,
                payload: row.payload,
                additional_info: row.additional_info,
                delay: None,
            },
            enqueued_at: row.enqueued_at,
            attempt: row.attempts as u32,
        }
    }
}

/// PostgreSQL implementation of [`QueueStore`].
pub struct PgQueueStore {
    pool: DbPool,
}

impl PgQueueStore {
    /// Create a store over an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        envelope: &JobEnvelope,
        opts: &EnqueueOptions,
    ) -> Result<DbId, QueueStoreError> {
        let delay_ms = opts.delay.map(|d| d.as_millis() as i64).unwrap_or(0);

        let id: DbId = sqlx::query_scalar(
            "INSERT INTO queued_jobs
                (service_name, payload, additional_info, max_attempts, backoff_ms, available_at)
             VALUES ($1, $2, $3, $4, $5,
                     now() + make_interval(secs => $6::double precision / 1000.0))
             RETURNING id",
        )
        .bind(&envelope.service_name)
        .bind(&envelope.payload)
        .bind(&envelope.additional_info)
        .bind(opts.max_attempts as i32)
        .bind(opts.backoff.as_millis() as i64)
        .bind(delay_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueStoreError> {
        let query = format!(
            "UPDATE queued_jobs
             SET status = 'running', attempts = attempts + 1, updated_at = now()
             WHERE id = (
                 SELECT id FROM queued_jobs
                 WHERE status = 'queued' AND available_at <= now()
                 ORDER BY id
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query_as::<_, QueuedJobRow>(&query)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(QueuedJob::from))
    }

    async fn complete(&self, id: DbId) -> Result<(), QueueStoreError> {
        sqlx::query("DELETE FROM queued_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        id: DbId,
        reason: &str,
        allow_retry: bool,
    ) -> Result<FailOutcome, QueueStoreError> {
        // One statement decides between redelivery and terminal retention so
        // two workers cannot disagree about a job's next state.
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE queued_jobs
             SET status = CASE WHEN $2 AND attempts < max_attempts
                               THEN 'queued' ELSE 'failed' END,
                 available_at = CASE WHEN $2 AND attempts < max_attempts
                                     THEN now() + make_interval(
                                         secs => backoff_ms::double precision / 1000.0)
                                     ELSE available_at END,
                 last_error = $3,
                 updated_at = now()
             WHERE id = $1
             RETURNING status",
        )
        .bind(id)
        .bind(allow_retry)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match status.as_deref() {
            Some("queued") => Ok(FailOutcome::Retrying),
            // A vanished row is treated as terminal: there is nothing left
            // to redeliver.
            _ => Ok(FailOutcome::Terminal),
        }
    }
}
