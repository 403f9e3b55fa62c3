//! Job queue boundary and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use serde::Serialize;

use compiler_core::{Job, JobId};

/// Lease/ack operations the runner needs from a queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Lease up to `limit` ready jobs, ordered by priority then age.
    async fn lease(&self, limit: u32) -> Result<Vec<Job>, QueueError>;

    /// Refresh the lease on `job_id` right before it is processed.
    ///
    /// Returns `false` when the lease is no longer held (expired and taken
    /// over, or already acked); the job must then be skipped.
    async fn renew(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// The job succeeded (or was skipped).
    async fn complete(&self, job_id: JobId) -> Result<(), QueueError>;

    /// The job failed. Critical failures are always requeued; others are
    /// requeued until the queue's attempt limit is reached.
    async fn fail(&self, job_id: JobId, reason: &str, critical: bool) -> Result<(), QueueError>;

    /// Return leased jobs unprocessed, without counting an attempt. Jobs that
    /// are no longer leased are left untouched.
    async fn release(&self, job_ids: &[JobId]) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn lease(&self, limit: u32) -> Result<Vec<Job>, QueueError> {
        (**self).lease(limit).await
    }

    async fn renew(&self, job_id: JobId) -> Result<bool, QueueError> {
        (**self).renew(job_id).await
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        (**self).complete(job_id).await
    }

    async fn fail(&self, job_id: JobId, reason: &str, critical: bool) -> Result<(), QueueError> {
        (**self).fail(job_id, reason, critical).await
    }

    async fn release(&self, job_ids: &[JobId]) -> Result<(), QueueError> {
        (**self).release(job_ids).await
    }
}

/// Job queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is not leased")]
    NotLeased(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Lifecycle of a job inside a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Leased,
    Done,
    /// Attempt limit reached; kept for inspection.
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    status: QueueStatus,
    last_error: Option<String>,
}

/// In-memory job queue for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    entries: RwLock<HashMap<JobId, Entry>>,
    max_attempts: u32,
}

impl InMemoryJobQueue {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new() -> Self {
        Self::with_max_attempts(Self::DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_attempts,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut entries = self.write();
        if entries.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        entries.insert(
            id,
            Entry {
                job,
                status: QueueStatus::Queued,
                last_error: None,
            },
        );
        Ok(id)
    }

    pub fn status(&self, job_id: JobId) -> Option<QueueStatus> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&job_id).map(|e| e.status)
    }

    pub fn attempts(&self, job_id: JobId) -> Option<u32> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&job_id).map(|e| e.job.attempts)
    }

    pub fn last_error(&self, job_id: JobId) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&job_id).and_then(|e| e.last_error.clone())
    }

    pub fn count(&self, status: QueueStatus) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|e| e.status == status).count()
    }

    fn leased_entry<'a>(
        entries: &'a mut HashMap<JobId, Entry>,
        job_id: JobId,
    ) -> Result<&'a mut Entry, QueueError> {
        let entry = entries.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if entry.status != QueueStatus::Leased {
            return Err(QueueError::NotLeased(job_id));
        }
        Ok(entry)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn lease(&self, limit: u32) -> Result<Vec<Job>, QueueError> {
        let mut entries = self.write();

        let mut candidates: Vec<&Entry> = entries
            .values()
            .filter(|e| e.status == QueueStatus::Queued)
            .collect();
        candidates.sort_by_key(|e| (e.job.priority, e.job.enqueued_at));

        let ids: Vec<JobId> = candidates
            .into_iter()
            .take(limit as usize)
            .map(|e| e.job.id)
            .collect();

        let mut leased = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = QueueStatus::Leased;
                leased.push(entry.job.clone());
            }
        }
        Ok(leased)
    }

    async fn renew(&self, job_id: JobId) -> Result<bool, QueueError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(&job_id).ok_or(QueueError::NotFound(job_id))?;
        Ok(entry.status == QueueStatus::Leased)
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut entries = self.write();
        let entry = Self::leased_entry(&mut entries, job_id)?;
        entry.status = QueueStatus::Done;
        Ok(())
    }

    async fn fail(&self, job_id: JobId, reason: &str, critical: bool) -> Result<(), QueueError> {
        let mut entries = self.write();
        let entry = Self::leased_entry(&mut entries, job_id)?;
        entry.job.attempts += 1;
        entry.last_error = Some(reason.to_string());
        entry.status = if critical || entry.job.attempts < self.max_attempts {
            QueueStatus::Queued
        } else {
            QueueStatus::Failed
        };
        Ok(())
    }

    async fn release(&self, job_ids: &[JobId]) -> Result<(), QueueError> {
        let mut entries = self.write();
        for &job_id in job_ids {
            let entry = entries.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
            if entry.status == QueueStatus::Leased {
                entry.status = QueueStatus::Queued;
            }
        }
        Ok(())
    }
}
