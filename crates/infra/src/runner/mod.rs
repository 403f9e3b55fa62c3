//! Job runner: leases jobs from a queue and drives a [`JobHandler`] per job.
//!
//! ## Design
//!
//! - One runner owns one queue handle and one handler (and through it one
//!   destination connection); jobs run strictly one after another
//! - Each job goes through `windup → execute_job → teardown(failed)` and the
//!   outcome is applied to the queue (complete / fail)
//! - A critical failure releases the rest of the leased batch back to the
//!   queue and backs the runner off before the next lease
//!
//! ## Components
//!
//! - `JobHandler`: capability interface a job implementation provides
//! - `JobQueue`: lease/ack boundary (in-memory or Postgres)
//! - `JobRunner`: the lease → dispatch → ack loop

pub mod executor;
pub mod postgres;
pub mod queue;
pub mod types;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use compiler_core::{JobError, JobId, JobOutcome};

use crate::error::StartupError;

pub use executor::{JobRunner, RunnerConfig, RunnerHandle};
pub use postgres::PostgresJobQueue;
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueStatus};
pub use types::{BackoffPolicy, BackoffStrategy, BatchReport, RunnerStats};

/// What a runner needs from a job implementation.
///
/// `windup` and `teardown` bracket every `execute_job` call; `teardown` gets
/// `failed = true` when `execute_job` returned an error.
#[async_trait]
pub trait JobHandler: Send {
    /// One-time initialisation before the first job.
    async fn setup(&mut self) -> Result<(), StartupError>;

    async fn windup(&mut self) -> Result<(), JobError>;

    async fn execute_job(
        &mut self,
        job_id: JobId,
        payload: &JsonValue,
        priority: i32,
    ) -> Result<JobOutcome, JobError>;

    async fn teardown(&mut self, failed: bool) -> Result<(), JobError>;
}
