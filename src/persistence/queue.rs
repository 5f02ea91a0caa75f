use crate::domain::{EnqueueOutcome, NewJob, ResolutionJob};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Queue depth by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable queue of resolution jobs
///
/// Enqueue is idempotent on the job's idempotency key, and the key is kept
/// after completion so a late duplicate stays a no-op.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome>;

    /// Claim up to `limit` due jobs. A wager with a running job is skipped so
    /// jobs for one wager never run concurrently.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolutionJob>>;

    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Put a claimed job back with a new run time
    async fn retry_later(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()>;

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Move a still-queued job to a new run time; false when no queued job has the key
    async fn reschedule(&self, idempotency_key: &str, run_at: DateTime<Utc>) -> Result<bool>;

    /// Requeue running jobs whose lease expired
    async fn requeue_stale(&self, lease: Duration, now: DateTime<Utc>) -> Result<u64>;

    async fn job(&self, job_id: Uuid) -> Result<Option<ResolutionJob>>;

    async fn stats(&self) -> Result<QueueStats>;
}
