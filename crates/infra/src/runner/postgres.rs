//! Postgres-backed job queue over the source database.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE job_queue (
//!     id          uuid PRIMARY KEY,
//!     type        text NOT NULL,
//!     payload     jsonb NOT NULL,
//!     priority    integer NOT NULL DEFAULT 0,
//!     status      text NOT NULL DEFAULT 'queued', -- queued | leased | done | failed
//!     attempts    integer NOT NULL DEFAULT 0,
//!     last_error  text,
//!     leased_by   uuid,
//!     leased_at   timestamptz,
//!     created_at  timestamptz NOT NULL DEFAULT now()
//! );
//! CREATE INDEX job_queue_ready ON job_queue (type, status, priority, created_at);
//! ```
//!
//! ## Leasing
//!
//! Jobs are leased with `FOR UPDATE SKIP LOCKED`, lowest `priority` first and
//! then oldest first, so several workers can share one table. A lease older
//! than `lease_timeout` is considered abandoned and can be taken over. The
//! runner renews each job's lease right before processing it, so the timeout
//! applies per job rather than per batch; a job whose lease was taken over in
//! the meantime is skipped by the worker that lost it.
//!
//! ## Error Mapping
//!
//! | SQLx Error | QueueError |
//! |------------|------------|
//! | any | `Storage` (operation name + driver message) |
//! | update matched no leased row | `NotLeased` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use compiler_core::{Job, JobId, WorkerId};

use super::queue::{JobQueue, QueueError};
use crate::config::DatabaseConfig;

/// Job queue stored in the `job_queue` table.
#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    job_type: String,
    worker_id: WorkerId,
    max_attempts: u32,
    lease_timeout: Duration,
}

impl PostgresJobQueue {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(pool: PgPool, job_type: impl Into<String>, worker_id: WorkerId) -> Self {
        Self {
            pool,
            job_type: job_type.into(),
            worker_id,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            lease_timeout: Self::DEFAULT_LEASE_TIMEOUT,
        }
    }

    /// Connect to the queue database with a small dedicated pool.
    #[instrument(skip(config, job_type), fields(host = %config.host, database = %config.database), err)]
    pub async fn connect(
        config: &DatabaseConfig,
        job_type: impl Into<String>,
        worker_id: WorkerId,
    ) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        debug!("connected to queue database");
        Ok(Self::new(pool, job_type, worker_id))
    }

    fn owner(&self) -> Uuid {
        *self.worker_id.as_uuid()
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip(self), fields(job_type = %self.job_type), err)]
    async fn lease(&self, limit: u32) -> Result<Vec<Job>, QueueError> {
        let rows = sqlx::query(
            r#"
            WITH next AS (
                SELECT id
                FROM job_queue
                WHERE type = $1
                  AND (status = 'queued'
                       OR (status = 'leased' AND leased_at < now() - make_interval(secs => $3)))
                ORDER BY priority ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue AS j
            SET status = 'leased', leased_by = $4, leased_at = now()
            FROM next
            WHERE j.id = next.id
            RETURNING j.id, j.payload, j.priority, j.attempts, j.created_at
            "#,
        )
        .bind(&self.job_type)
        .bind(i64::from(limit))
        .bind(self.lease_timeout.as_secs_f64())
        .bind(self.owner())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("lease", e))?;

        let mut jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not keep the CTE order.
        jobs.sort_by_key(|j| (j.priority, j.enqueued_at));
        Ok(jobs)
    }

    #[instrument(skip(self, job_id), fields(job_id = %job_id), err)]
    async fn renew(&self, job_id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET leased_at = now()
            WHERE id = $1 AND status = 'leased' AND leased_by = $2
            "#,
        )
        .bind(*job_id.as_uuid())
        .bind(self.owner())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("renew", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, job_id), fields(job_id = %job_id), err)]
    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'done', leased_by = NULL, leased_at = NULL
            WHERE id = $1 AND status = 'leased' AND leased_by = $2
            "#,
        )
        .bind(*job_id.as_uuid())
        .bind(self.owner())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotLeased(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self, job_id, reason), fields(job_id = %job_id), err)]
    async fn fail(&self, job_id: JobId, reason: &str, critical: bool) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET attempts = attempts + 1,
                last_error = $3,
                status = CASE WHEN $4 OR attempts + 1 < $5 THEN 'queued' ELSE 'failed' END,
                leased_by = NULL,
                leased_at = NULL
            WHERE id = $1 AND status = 'leased' AND leased_by = $2
            "#,
        )
        .bind(*job_id.as_uuid())
        .bind(self.owner())
        .bind(reason)
        .bind(critical)
        .bind(i32::try_from(self.max_attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotLeased(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self, job_ids), fields(count = job_ids.len()), err)]
    async fn release(&self, job_ids: &[JobId]) -> Result<(), QueueError> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = job_ids.iter().map(|id| *id.as_uuid()).collect();

        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'queued', leased_by = NULL, leased_at = NULL
            WHERE id = ANY($1) AND status = 'leased' AND leased_by = $2
            "#,
        )
        .bind(&ids)
        .bind(self.owner())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, QueueError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode job row", e);

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let payload: JsonValue = row.try_get("payload").map_err(decode)?;
    let priority: i32 = row.try_get("priority").map_err(decode)?;
    let attempts: i32 = row.try_get("attempts").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Job {
        id: JobId::from_uuid(id),
        payload,
        priority,
        attempts: u32::try_from(attempts).unwrap_or(0),
        enqueued_at: created_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => QueueError::Storage(format!(
            "database error in {}{}: {}",
            operation,
            db_err
                .code()
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default(),
            db_err.message()
        )),
        other => QueueError::Storage(format!("{} failed: {}", operation, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_become_storage_errors() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));

        let mapped = map_sqlx_error("lease", err);

        assert!(matches!(mapped, QueueError::Storage(ref m) if m.starts_with("lease failed")));
    }

    #[test]
    fn row_not_found_names_the_operation() {
        let mapped = map_sqlx_error("complete", sqlx::Error::RowNotFound);

        assert!(mapped.to_string().contains("complete"));
    }
}
