//! Engine assembly
//!
//! Wires stores, queue, caches, feeds, validators, workers and the scheduler
//! into one running process, and tears them down in dependency order.

use crate::adapters::{
    EspnNflSource, MemoryJobQueue, MemoryStore, NbaCdnSource, PostgresCache, PostgresJobQueue,
    PostgresStore,
};
use crate::config::AppConfig;
use crate::coordination::shutdown::ShutdownError;
use crate::coordination::{GracefulShutdown, PhaseFuture};
use crate::domain::League;
use crate::error::{Result, WagerError};
use crate::feed::{FeedRegistry, GameFeedProvider, GameSource};
use crate::ledger::LedgerService;
use crate::modes::{LeagueKernel, ValidatorDeps};
use crate::persistence::{
    AuditLog, Baseline, BaselineStore, BetStore, DurableCache, FallbackCache, GameSnapshotStore,
    JobQueue, PgAuditLog,
};
use crate::services::health::HealthState;
use crate::services::scheduler::LifecycleScheduler;
use crate::services::wagers::WagerService;
use crate::services::worker::{LedgerJobHandler, WorkerPool};
use crate::services::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RESYNC_INTERVAL: Duration = Duration::from_secs(60);
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(600);
const KERNEL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage backends the engine runs on
struct Backends {
    store: Arc<dyn BetStore>,
    audit: Arc<dyn AuditLog>,
    queue: Arc<dyn JobQueue>,
    cache: Arc<FallbackCache>,
    postgres: Option<PostgresStore>,
}

#[derive(Default)]
struct Tasks {
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

pub struct Engine {
    config: AppConfig,
    store: Arc<dyn BetStore>,
    queue: Arc<dyn JobQueue>,
    cache: Arc<FallbackCache>,
    baselines: Arc<BaselineStore>,
    metrics: Arc<Metrics>,
    ledger: Arc<LedgerService>,
    scheduler: Arc<LifecycleScheduler>,
    workers: Arc<WorkerPool>,
    wagers: Arc<WagerService>,
    feeds: Arc<FeedRegistry>,
    kernels: Vec<Arc<LeagueKernel>>,
    postgres: Option<PostgresStore>,
    tasks: Mutex<Tasks>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Engine {
    /// Production engine on PostgreSQL with live feeds from config
    pub async fn postgres(config: AppConfig) -> Result<Self> {
        let pg = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
        pg.migrate().await?;
        let pool = pg.pool().clone();

        let mut sources: Vec<Arc<dyn GameSource>> = Vec::new();
        if config.feeds.nfl.enabled {
            sources.push(Arc::new(EspnNflSource::new(&config.feeds.nfl)?));
        }
        if config.feeds.nba.enabled {
            sources.push(Arc::new(NbaCdnSource::new(&config.feeds.nba)?));
        }

        let backends = Backends {
            store: Arc::new(pg.clone()),
            audit: Arc::new(PgAuditLog::new(pool.clone())),
            queue: Arc::new(PostgresJobQueue::new(pool.clone(), config.queue.max_attempts)),
            cache: Arc::new(FallbackCache::new(Arc::new(PostgresCache::new(pool)))),
            postgres: Some(pg),
        };
        Ok(Self::assemble(config, backends, sources))
    }

    /// Engine on in-process storage; feeds are whatever sources are given
    pub fn in_memory(config: AppConfig, sources: Vec<Arc<dyn GameSource>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let backends = Backends {
            store: store.clone(),
            audit: store,
            queue: Arc::new(MemoryJobQueue::new(config.queue.max_attempts)),
            cache: Arc::new(FallbackCache::memory_only()),
            postgres: None,
        };
        Self::assemble(config, backends, sources)
    }

    fn assemble(config: AppConfig, backends: Backends, sources: Vec<Arc<dyn GameSource>>) -> Self {
        let Backends {
            store,
            audit,
            queue,
            cache,
            postgres,
        } = backends;
        let metrics = Arc::new(Metrics::new());

        let durable: Arc<dyn DurableCache> = cache.clone();
        let baselines = Arc::new(BaselineStore::new(
            durable.clone(),
            Duration::from_secs(config.baseline.ttl_secs),
            Duration::from_secs(config.baseline.signature_ttl_secs),
        ));
        let snapshots = Arc::new(GameSnapshotStore::new(
            durable,
            Duration::from_secs(config.baseline.snapshot_ttl_secs),
        ));

        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            baselines.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(
            queue.clone(),
            ledger.clone(),
            config.scheduler.clone(),
        ));
        let handler = Arc::new(LedgerJobHandler::new(ledger.clone(), audit.clone()));
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            handler,
            audit.clone(),
            metrics.clone(),
            config.queue.clone(),
        ));
        let wagers = Arc::new(WagerService::new(
            store.clone(),
            audit,
            queue.clone(),
            scheduler.clone(),
        ));

        let feeds = Arc::new(FeedRegistry::new());
        for source in sources {
            let Some(feed_config) = config.feeds.for_league(source.league()) else {
                warn!(source = source.name(), "No feed settings for league, skipping");
                continue;
            };
            feeds.register(Arc::new(GameFeedProvider::new(
                source,
                feed_config.clone(),
                config.breaker.clone(),
                snapshots.clone(),
                metrics.clone(),
            )));
        }

        let deps = ValidatorDeps {
            store: store.clone(),
            queue: queue.clone(),
            baselines: baselines.clone(),
            snapshots,
            metrics: metrics.clone(),
            resync_interval: RESYNC_INTERVAL,
        };
        let kernels = League::ALL
            .iter()
            .map(|&league| Arc::new(LeagueKernel::new(league, feeds.get(league), deps.clone())))
            .collect();

        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            queue,
            cache,
            baselines,
            metrics,
            ledger,
            scheduler,
            workers,
            wagers,
            feeds,
            kernels,
            postgres,
            tasks: Mutex::new(Tasks::default()),
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BetStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &Arc<LifecycleScheduler> {
        &self.scheduler
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn wagers(&self) -> &Arc<WagerService> {
        &self.wagers
    }

    pub fn feeds(&self) -> &Arc<FeedRegistry> {
        &self.feeds
    }

    pub fn kernel(&self, league: League) -> Option<&Arc<LeagueKernel>> {
        self.kernels.iter().find(|k| k.league() == league)
    }

    /// Shared state for the health server
    pub fn health_state(&self) -> Arc<HealthState> {
        Arc::new(HealthState::new(
            self.queue.clone(),
            self.feeds.clone(),
            self.cache.clone(),
            self.metrics.clone(),
            self.wagers.clone(),
        ))
    }

    /// Capture a pending wager's baseline through its mode's validator.
    ///
    /// Returns `None` for modes without a validator or when the game has
    /// not been seen yet.
    pub async fn capture_baseline(&self, bet_id: Uuid) -> Result<Option<Baseline>> {
        let wager = self
            .store
            .wager(bet_id)
            .await?
            .ok_or(WagerError::BetNotFound(bet_id))?;
        let validator = self
            .kernel(wager.league)
            .and_then(|k| k.validator(wager.mode_key));
        match validator {
            Some(v) => v.capture_baseline(bet_id).await,
            None => Ok(None),
        }
    }

    /// Drop a wager's baseline so the next capture reads the game afresh
    pub async fn clear_baseline(&self, bet_id: Uuid) -> Result<()> {
        self.baselines.delete(bet_id).await
    }

    /// Start every background component
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;

        if let Some(pg) = &self.postgres {
            tasks
                .background
                .push(pg.spawn_status_listener(self.stop_tx.subscribe()));
        }

        for kernel in &self.kernels {
            kernel.start().await;
        }
        tasks.workers = self.workers.start();
        tasks.scheduler = Some(self.scheduler.start());

        let cache = self.cache.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tasks.background.push(tokio::spawn(async move {
            let mut timer = tokio::time::interval(CACHE_PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = timer.tick() => match cache.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => debug!("Purged {} expired cache entries", n),
                        Err(e) => warn!("Cache purge failed: {}", e),
                    },
                    _ = stop_rx.changed() => break,
                }
            }
        }));

        info!(
            feeds = ?self.feeds.leagues(),
            workers = self.config.queue.workers,
            "Engine started"
        );
    }

    /// Stop in order: scheduler, validators, workers (draining), feeds
    pub async fn shutdown(&self, shutdown: &GracefulShutdown) -> std::result::Result<(), ShutdownError> {
        let (workers, scheduler_task, background) = {
            let mut tasks = self.tasks.lock().await;
            (
                std::mem::take(&mut tasks.workers),
                tasks.scheduler.take(),
                std::mem::take(&mut tasks.background),
            )
        };

        let scheduler = self.scheduler.clone();
        let stop_scheduler: PhaseFuture = Box::pin(async move {
            scheduler.stop();
            if let Some(task) = scheduler_task {
                let _ = task.await;
            }
        });

        let kernels = self.kernels.clone();
        let stop_validators: PhaseFuture = Box::pin(async move {
            for kernel in &kernels {
                kernel.stop_validators(KERNEL_STOP_TIMEOUT).await;
            }
        });

        let pool = self.workers.clone();
        let drain_jobs: PhaseFuture = Box::pin(async move {
            pool.stop();
            futures::future::join_all(workers).await;
        });

        let kernels = self.kernels.clone();
        let stop_tx = self.stop_tx.clone();
        let stop_feeds: PhaseFuture = Box::pin(async move {
            for kernel in &kernels {
                kernel.stop_feed(KERNEL_STOP_TIMEOUT).await;
            }
            let _ = stop_tx.send(true);
            futures::future::join_all(background).await;
        });

        shutdown
            .execute(stop_scheduler, stop_validators, drain_jobs, stop_feeds)
            .await
    }
}
