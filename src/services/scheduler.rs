//! Bet lifecycle scheduler
//!
//! Each wager gets one delayed `close_bet` job at its close time, keyed by
//! the wager id so re-registering is a no-op. A recurring sweep closes any
//! wager still `active` past its close time, which covers timers lost to
//! downtime or a failed registration.

use crate::config::SchedulerConfig;
use crate::domain::{idempotency_key, EnqueueOutcome, JobKind, NewJob};
use crate::error::Result;
use crate::ledger::LedgerService;
use crate::persistence::{JobQueue, TransitionOutcome};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub closed: usize,
    pub washed: usize,
    /// Already moved on by a close job
    pub skipped: usize,
    pub failed: usize,
}

pub struct LifecycleScheduler {
    queue: Arc<dyn JobQueue>,
    ledger: Arc<LedgerService>,
    config: SchedulerConfig,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl LifecycleScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, ledger: Arc<LedgerService>, config: SchedulerConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue,
            ledger,
            config,
            running: AtomicBool::new(false),
            stop_tx,
        }
    }

    /// Enqueue the close timer for a wager
    pub async fn register(&self, bet_id: Uuid, close_time: DateTime<Utc>) -> Result<EnqueueOutcome> {
        let job = NewJob::close_bet(bet_id, close_time).with_max_attempts(self.config.close_max_attempts);
        let outcome = self.queue.enqueue(job).await?;
        if outcome.is_duplicate() {
            debug!(bet_id = %bet_id, "Close timer already registered");
        } else {
            debug!(bet_id = %bet_id, close_time = %close_time, "Close timer registered");
        }
        Ok(outcome)
    }

    /// Move a wager's close timer; registers it if none is queued
    pub async fn reschedule(&self, bet_id: Uuid, close_time: DateTime<Utc>) -> Result<()> {
        let key = idempotency_key(JobKind::CloseBet, bet_id, None);
        if self.queue.reschedule(&key, close_time).await? {
            debug!(bet_id = %bet_id, close_time = %close_time, "Close timer moved");
            return Ok(());
        }
        let outcome = self.register(bet_id, close_time).await?;
        if outcome.is_duplicate() {
            // The timer already ran or is running; the sweep covers the new time
            warn!(bet_id = %bet_id, "Close timer not queued, relying on sweep");
        }
        Ok(())
    }

    /// Close every overdue active wager
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let overdue = self
            .ledger
            .store()
            .overdue_active(now, self.config.sweep_batch_size)
            .await?;

        let mut summary = SweepSummary {
            scanned: overdue.len(),
            ..SweepSummary::default()
        };
        for bet_id in overdue {
            match self.ledger.close(bet_id, now).await {
                Ok(TransitionOutcome::Applied { to, .. }) if to.is_terminal() => summary.washed += 1,
                Ok(TransitionOutcome::Applied { .. }) => summary.closed += 1,
                Ok(TransitionOutcome::AlreadySettled { .. }) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(bet_id = %bet_id, "Sweep close failed: {}", e);
                }
            }
        }

        if summary.scanned > 0 {
            info!(
                "Sweep: {} overdue, {} closed, {} washed, {} skipped, {} failed",
                summary.scanned, summary.closed, summary.washed, summary.skipped, summary.failed
            );
        }
        Ok(summary)
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!("Lifecycle sweep started (interval: {:?})", interval);
            let mut timer = tokio::time::interval(interval);
            while this.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = this.sweep(Utc::now()).await {
                            warn!("Sweep failed: {}", e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("Lifecycle sweep stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
