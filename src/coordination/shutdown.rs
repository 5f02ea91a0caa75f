//! Graceful Shutdown Handler
//!
//! Stops the engine in dependency order: no new close transitions from the
//! sweep, no new decisions from validators, in-flight resolution jobs finish,
//! then the feed pollers stop. Each phase is bounded by its own timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - reduce timeouts
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown (default: 90s)
    pub total_timeout_secs: u64,
    pub scheduler_stop_timeout_secs: u64,
    pub validator_stop_timeout_secs: u64,
    /// Time allowed for in-flight jobs to finish (default: 60s)
    pub job_drain_timeout_secs: u64,
    pub feed_stop_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 90,
            scheduler_stop_timeout_secs: 5,
            validator_stop_timeout_secs: 10,
            job_drain_timeout_secs: 60,
            feed_stop_timeout_secs: 10,
        }
    }
}

impl ShutdownConfig {
    /// Quarter of every timeout, for urgent shutdowns
    pub fn urgent(&self) -> Self {
        Self {
            total_timeout_secs: (self.total_timeout_secs / 4).max(1),
            scheduler_stop_timeout_secs: (self.scheduler_stop_timeout_secs / 4).max(1),
            validator_stop_timeout_secs: (self.validator_stop_timeout_secs / 4).max(1),
            job_drain_timeout_secs: (self.job_drain_timeout_secs / 4).max(1),
            feed_stop_timeout_secs: (self.feed_stop_timeout_secs / 4).max(1),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Close sweep and timers stop enqueueing
    StoppingScheduler,
    /// Validators stop deciding
    StoppingValidators,
    /// Workers finish in-flight jobs
    DrainingJobs,
    /// Pollers stop
    StoppingFeeds,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingScheduler => write!(f, "stopping_scheduler"),
            ShutdownPhase::StoppingValidators => write!(f, "stopping_validators"),
            ShutdownPhase::DrainingJobs => write!(f, "draining_jobs"),
            ShutdownPhase::StoppingFeeds => write!(f, "stopping_feeds"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Boxed step run during one shutdown phase
pub type PhaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    urgent: AtomicBool,
    phase: watch::Sender<ShutdownPhase>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            urgent: AtomicBool::new(false),
            phase: phase_tx,
            phase_rx,
            signal_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if signal == ShutdownSignal::Urgent {
            self.urgent.store(true, Ordering::SeqCst);
        }
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    /// Resolves once shutdown has been requested
    pub async fn requested(&self) {
        let mut rx = self.signal_tx.subscribe();
        if self.is_shutdown_requested() {
            return;
        }
        let _ = rx.recv().await;
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let _ = self.phase.send(phase);
        info!("Shutdown phase: {}", phase);
    }

    async fn run_phase(&self, phase: ShutdownPhase, timeout_secs: u64, step: PhaseFuture) {
        self.set_phase(phase);
        match tokio::time::timeout(Duration::from_secs(timeout_secs), step).await {
            Ok(()) => debug!("Phase {} finished", phase),
            Err(_) => warn!("Phase {} timed out after {}s, proceeding anyway", phase, timeout_secs),
        }
    }

    /// Execute graceful shutdown sequence
    ///
    /// 1. Stop the lifecycle scheduler
    /// 2. Stop validators
    /// 3. Drain resolution workers
    /// 4. Stop feed providers
    pub async fn execute(
        &self,
        stop_scheduler: PhaseFuture,
        stop_validators: PhaseFuture,
        drain_jobs: PhaseFuture,
        stop_feeds: PhaseFuture,
    ) -> Result<(), ShutdownError> {
        let config = if self.urgent.load(Ordering::SeqCst) {
            self.config.urgent()
        } else {
            self.config.clone()
        };
        let start = std::time::Instant::now();
        let total_timeout = Duration::from_secs(config.total_timeout_secs);

        info!(
            "Starting graceful shutdown (timeout: {}s)",
            config.total_timeout_secs
        );

        self.run_phase(
            ShutdownPhase::StoppingScheduler,
            config.scheduler_stop_timeout_secs,
            stop_scheduler,
        )
        .await;
        self.run_phase(
            ShutdownPhase::StoppingValidators,
            config.validator_stop_timeout_secs,
            stop_validators,
        )
        .await;
        self.run_phase(
            ShutdownPhase::DrainingJobs,
            config.job_drain_timeout_secs,
            drain_jobs,
        )
        .await;

        if start.elapsed() > total_timeout {
            error!("Total shutdown timeout exceeded");
            self.set_phase(ShutdownPhase::Complete);
            return Err(ShutdownError::Timeout);
        }

        self.run_phase(
            ShutdownPhase::StoppingFeeds,
            config.feed_stop_timeout_secs,
            stop_feeds,
        )
        .await;

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
        Ok(())
    }
}

/// Shutdown errors
#[derive(Debug, Clone)]
pub enum ShutdownError {
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, urgency) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(urgency);
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
            info!("Received Ctrl+C");
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        });
    }
}
