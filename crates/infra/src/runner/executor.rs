//! Lease → dispatch → ack loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use compiler_core::{Job, JobError, JobId, JobOutcome};

use super::queue::{JobQueue, QueueError};
use super::types::{BackoffPolicy, BatchReport, RunnerStats};
use super::JobHandler;
use crate::config::WorkerConfig;
use crate::error::StartupError;

/// Job runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum jobs leased per batch
    pub batch_limit: u32,
    /// Sleep after an empty lease or a queue error
    pub poll_interval: Duration,
    /// Pause after batches that hit a critical failure
    pub backoff: BackoffPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "compile".to_string(),
            batch_limit: 20,
            poll_interval: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            name: config.job_type.clone(),
            batch_limit: config.batch_limit,
            poll_interval: config.poll_interval,
            ..Self::default()
        }
    }

    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Handle to control a spawned runner.
#[derive(Debug)]
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<RunnerStats>,
}

impl RunnerHandle {
    /// Request graceful shutdown and wait for the current batch to finish.
    pub async fn shutdown(self) -> Result<RunnerStats, JoinError> {
        let _ = self.shutdown.send(true);
        self.join.await
    }
}

/// Runs jobs from a [`JobQueue`] through a [`JobHandler`], one at a time.
pub struct JobRunner<Q, H> {
    queue: Q,
    handler: H,
    config: RunnerConfig,
    stats: RunnerStats,
    consecutive_critical: u32,
}

impl<Q, H> JobRunner<Q, H>
where
    Q: JobQueue,
    H: JobHandler,
{
    pub fn new(queue: Q, handler: H, config: RunnerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            stats: RunnerStats::default(),
            consecutive_critical: 0,
        }
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// Run the handler's one-time setup. Must succeed before the first batch.
    pub async fn setup(&mut self) -> Result<(), StartupError> {
        self.handler.setup().await?;
        info!(runner = %self.config.name, "job runner ready");
        Ok(())
    }

    /// Lease one batch and process it.
    ///
    /// Stops at the first critical failure and releases the jobs after it.
    /// A failing queue call also stops the batch: the unacked job and
    /// everything after it are released (best effort) before the error is
    /// returned, so nothing stays leased by this runner.
    pub async fn run_batch(&mut self) -> Result<BatchReport, QueueError> {
        let jobs = self.queue.lease(self.config.batch_limit).await?;
        let mut report = BatchReport {
            leased: jobs.len(),
            ..BatchReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        debug!(runner = %self.config.name, leased = jobs.len(), "leased batch");

        let mut pending = jobs.into_iter();
        let dispatched = self.dispatch(&mut pending, &mut report).await;

        let mut rest: Vec<JobId> = Vec::new();
        if let Err((job_id, err)) = &dispatched {
            error!(
                runner = %self.config.name,
                job_id = %job_id,
                error = %err,
                "queue call failed, batch aborted"
            );
            rest.push(*job_id);
        }
        rest.extend(pending.map(|j| j.id));

        let released = self.release_rest(&rest).await;
        if let Ok(count) = released {
            report.released = count;
        }
        self.stats.record(&report);

        dispatched.map_err(|(_, err)| err)?;
        released.map(|_| report)
    }

    /// Run jobs from `pending` until it is empty or a job fails critically.
    ///
    /// On a queue error, returns the id of the job whose call failed.
    async fn dispatch(
        &mut self,
        pending: &mut std::vec::IntoIter<Job>,
        report: &mut BatchReport,
    ) -> Result<(), (JobId, QueueError)> {
        for job in pending.by_ref() {
            let on = |err| (job.id, err);

            if !self.queue.renew(job.id).await.map_err(on)? {
                warn!(runner = %self.config.name, job_id = %job.id, "lease lost, skipping job");
                report.lost += 1;
                continue;
            }

            match self.process_job(&job).await {
                Ok(outcome) => {
                    self.queue.complete(job.id).await.map_err(on)?;
                    if outcome.is_skipped() {
                        report.skipped += 1;
                    } else {
                        report.compiled += 1;
                    }
                }
                Err(err) => {
                    let critical = err.is_critical();
                    self.queue
                        .fail(job.id, &err.to_string(), critical)
                        .await
                        .map_err(on)?;
                    report.failed += 1;

                    if critical {
                        report.critical = true;
                        warn!(
                            runner = %self.config.name,
                            job_id = %job.id,
                            "critical failure, batch aborted"
                        );
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn release_rest(&self, job_ids: &[JobId]) -> Result<usize, QueueError> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        match self.queue.release(job_ids).await {
            Ok(()) => {
                debug!(runner = %self.config.name, released = job_ids.len(), "released jobs");
                Ok(job_ids.len())
            }
            Err(err) => {
                warn!(
                    runner = %self.config.name,
                    count = job_ids.len(),
                    error = %err,
                    "failed to release unprocessed jobs"
                );
                Err(err)
            }
        }
    }

    async fn process_job(&mut self, job: &Job) -> Result<JobOutcome, JobError> {
        self.handler.windup().await?;

        let result = self
            .handler
            .execute_job(job.id, &job.payload, job.priority)
            .await;
        let teardown = self.handler.teardown(result.is_err()).await;

        match (result, teardown) {
            (Ok(outcome), Ok(())) => {
                debug!(job_id = %job.id, ?outcome, "job completed");
                Ok(outcome)
            }
            (Ok(_), Err(err)) => {
                warn!(job_id = %job.id, error = %err, "job failed at teardown");
                Err(err)
            }
            (Err(err), Ok(())) => {
                debug!(job_id = %job.id, error = %err, "job failed");
                Err(err)
            }
            (Err(err), Err(teardown_err)) => {
                warn!(
                    job_id = %job.id,
                    error = %err,
                    teardown_error = %teardown_err,
                    "teardown failed after job failure"
                );
                Err(err)
            }
        }
    }

    /// Run batches until `shutdown` turns true (or its sender goes away).
    ///
    /// Shutdown is observed between batches and during pauses; a batch in
    /// progress always runs to completion.
    pub async fn start(mut self, mut shutdown: watch::Receiver<bool>) -> RunnerStats {
        info!(
            runner = %self.config.name,
            batch_limit = self.config.batch_limit,
            "job runner started"
        );

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            let pause = match self.run_batch().await {
                Ok(report) if report.critical => {
                    self.consecutive_critical += 1;
                    let delay = self.config.backoff.delay_for(self.consecutive_critical);
                    warn!(
                        runner = %self.config.name,
                        consecutive = self.consecutive_critical,
                        delay_ms = delay.as_millis() as u64,
                        "backing off after critical batch"
                    );
                    delay
                }
                Ok(report) if report.leased == 0 => {
                    self.consecutive_critical = 0;
                    self.config.poll_interval
                }
                Ok(report) => {
                    self.consecutive_critical = 0;
                    info!(
                        runner = %self.config.name,
                        compiled = report.compiled,
                        skipped = report.skipped,
                        failed = report.failed,
                        "batch done"
                    );
                    Duration::ZERO
                }
                Err(err) => {
                    self.stats.queue_errors += 1;
                    error!(runner = %self.config.name, error = %err, "job queue error");
                    self.config.poll_interval
                }
            };

            if !pause.is_zero() && pause_or_shutdown(&mut shutdown, pause).await {
                break;
            }
        }

        info!(runner = %self.config.name, stats = ?self.stats, "job runner stopped");
        self.stats
    }

    /// Spawn the runner on the current tokio runtime.
    pub fn spawn(self) -> RunnerHandle
    where
        Q: 'static,
        H: Sync + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(self.start(rx));
        RunnerHandle { shutdown, join }
    }
}

/// Sleep for `pause`; returns true when shutdown was requested meanwhile.
async fn pause_or_shutdown(shutdown: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(pause) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
