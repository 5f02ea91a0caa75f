//! Resolution job workers
//!
//! Workers claim due jobs from the queue and hand them to a [`JobHandler`].
//! Transient failures are retried with exponential backoff and jitter until
//! the job's attempts run out; anything else fails the job permanently and
//! leaves a `resolution_failed` audit event behind.

use crate::config::QueueConfig;
use crate::domain::{
    AuditEventType, JobKind, NewAuditEvent, RecordAuditPayload, ResolutionJob,
    SetWinningChoicePayload, WashPayload,
};
use crate::error::Result;
use crate::ledger::LedgerService;
use crate::persistence::{AuditLog, JobQueue, TransitionOutcome};
use crate::services::Metrics;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Executes one job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ResolutionJob) -> Result<()>;
}

/// Runs every job kind against the ledger and audit log
pub struct LedgerJobHandler {
    ledger: Arc<LedgerService>,
    audit: Arc<dyn AuditLog>,
}

impl LedgerJobHandler {
    pub fn new(ledger: Arc<LedgerService>, audit: Arc<dyn AuditLog>) -> Self {
        Self { ledger, audit }
    }

    fn log_outcome(job: &ResolutionJob, outcome: TransitionOutcome) {
        if let TransitionOutcome::AlreadySettled { status } = outcome {
            debug!(job_id = %job.id, kind = %job.kind, "No-op, bet already {}", status);
        }
    }
}

#[async_trait]
impl JobHandler for LedgerJobHandler {
    async fn handle(&self, job: &ResolutionJob) -> Result<()> {
        let now = Utc::now();
        match job.kind {
            JobKind::CloseBet => {
                let outcome = self.ledger.close(job.bet_id, now).await?;
                Self::log_outcome(job, outcome);
            }
            JobKind::SetWinningChoice => {
                let payload: SetWinningChoicePayload = job.payload_as()?;
                let outcome = self
                    .ledger
                    .resolve(job.bet_id, &payload.choice, &payload.origin, now)
                    .await?;
                Self::log_outcome(job, outcome);
            }
            JobKind::Wash => {
                let payload: WashPayload = job.payload_as()?;
                let outcome = self.ledger.wash(job.bet_id, &payload.reason, now).await?;
                Self::log_outcome(job, outcome);
            }
            JobKind::RecordAudit => {
                let payload: RecordAuditPayload = job.payload_as()?;
                let event = NewAuditEvent::new(job.bet_id, payload.event_type, payload.payload);
                if self
                    .audit
                    .append_once(&job.idempotency_key, event)
                    .await?
                    .is_none()
                {
                    debug!(job_id = %job.id, "Audit event already recorded by an earlier run");
                }
            }
        }
        Ok(())
    }
}

/// What happened to a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Completed,
    Retried,
    Failed,
}

/// Worker pool over the resolution queue
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    audit: Arc<dyn AuditLog>,
    metrics: Arc<Metrics>,
    config: QueueConfig,
    running: AtomicBool,
    in_flight: AtomicUsize,
    stop_tx: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        audit: Arc<dyn AuditLog>,
        metrics: Arc<Metrics>,
        config: QueueConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue,
            handler,
            audit,
            metrics,
            config,
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            stop_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Exponential backoff for the given attempt number, before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self
            .config
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(exp));
        Duration::from_millis(delay.min(self.config.max_backoff_ms))
    }

    /// Backoff with up to +25% jitter so retries for many bets spread out
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let extra = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + extra)
    }

    /// Record a permanent failure on the bet's audit trail
    async fn record_failure(&self, job: &ResolutionJob, error: &str) {
        let event = NewAuditEvent::new(
            job.bet_id,
            AuditEventType::ResolutionFailed,
            serde_json::json!({
                "job_id": job.id,
                "kind": job.kind,
                "idempotency_key": job.idempotency_key,
                "attempts": job.attempts,
                "error": error,
            }),
        );
        if let Err(e) = self.audit.append(event).await {
            error!(job_id = %job.id, bet_id = %job.bet_id, "Failed to record resolution failure: {}", e);
        }
    }

    /// Run one claimed job to a disposition
    #[instrument(skip_all, fields(job_id = %job.id, kind = %job.kind, bet_id = %job.bet_id))]
    pub async fn execute(&self, job: &ResolutionJob) -> Result<JobDisposition> {
        match self.handler.handle(job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                self.metrics.inc_jobs_completed();
                debug!("Job completed");
                Ok(JobDisposition::Completed)
            }
            Err(e) if e.is_transient() && !job.exhausted() => {
                let delay = self.jittered_backoff(job.attempts);
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
                warn!(
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    "Job failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                self.queue.retry_later(job.id, run_at, &e.to_string()).await?;
                self.metrics.inc_jobs_retried();
                Ok(JobDisposition::Retried)
            }
            Err(e) => {
                let message = e.to_string();
                error!(attempts = job.attempts, "Job failed permanently: {}", message);
                self.queue.fail_permanently(job.id, &message).await?;
                self.record_failure(job, &message).await;
                self.metrics.inc_jobs_failed();
                Ok(JobDisposition::Failed)
            }
        }
    }

    /// Claim and run one batch; returns how many jobs were processed
    pub async fn run_once(&self, worker_id: &str) -> Result<usize> {
        let jobs = self.queue.claim(worker_id, 1, Utc::now()).await?;
        let count = jobs.len();
        for job in jobs {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let result = self.execute(&job).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = result {
                // The lease will expire and the job gets requeued
                error!(job_id = %job.id, "Could not record job outcome: {}", e);
            }
        }
        Ok(count)
    }

    /// Run until the queue has nothing due; used by one-shot commands and tests
    pub async fn drain(&self, worker_id: &str) -> Result<usize> {
        let mut total = 0;
        loop {
            let n = self.run_once(worker_id).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    /// Spawn the workers plus the stale-lease reaper
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut handles = Vec::with_capacity(self.config.workers + 1);

        for n in 0..self.config.workers {
            let this = Arc::clone(self);
            let mut stop_rx = self.stop_tx.subscribe();
            let worker_id = format!("worker-{}-{}", std::process::id(), n);
            handles.push(tokio::spawn(async move {
                debug!(worker = %worker_id, "Worker started");
                while this.running.load(Ordering::SeqCst) {
                    let idle = match this.run_once(&worker_id).await {
                        Ok(n) => n == 0,
                        Err(e) => {
                            warn!(worker = %worker_id, "Claim failed: {}", e);
                            true
                        }
                    };
                    if idle {
                        tokio::select! {
                            _ = tokio::time::sleep(poll) => {}
                            _ = stop_rx.changed() => break,
                        }
                    }
                }
                debug!(worker = %worker_id, "Worker stopped");
            }));
        }

        let this = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let lease = Duration::from_secs(self.config.lease_secs);
        handles.push(tokio::spawn(async move {
            let mut timer = tokio::time::interval(lease / 2);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match this.queue.requeue_stale(lease, Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => warn!("Requeued {} jobs with expired leases", n),
                            Err(e) => warn!("Stale lease sweep failed: {}", e),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        }));

        info!(workers = self.config.workers, "Resolution workers started");
        handles
    }

    /// Stop claiming new jobs; in-flight jobs finish on their own
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }
}
