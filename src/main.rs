use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wagerd::adapters::{EspnNflSource, NbaCdnSource, PostgresStore};
use wagerd::cli::{self, Cli, Commands, OutputMode};
use wagerd::config::{AppConfig, LoggingConfig};
use wagerd::coordination::{install_signal_handlers, GracefulShutdown};
use wagerd::domain::{GameSnapshot, League};
use wagerd::error::{Result, WagerError};
use wagerd::feed::{GameFeedProvider, GameSource};
use wagerd::persistence::{GameSnapshotStore, MemoryCache};
use wagerd::services::{Engine, HealthServer, Metrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_json_flag(cli.json);

    match &cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            let _guard = init_logging(&config.logging);
            run_engine(config).await?;
        }
        Some(Commands::Migrate) => {
            init_logging_simple();
            let config = load_config(&cli)?;
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
            println!("Migrations applied");
        }
        Some(Commands::Sweep) => {
            init_logging_simple();
            let engine = Engine::postgres(load_config(&cli)?).await?;
            let summary = engine.scheduler().sweep(Utc::now()).await?;
            let drained = engine.workers().drain("cli-sweep").await?;
            cli::show_sweep(&summary, drained);
        }
        Some(Commands::Jobs) => {
            init_logging_simple();
            let engine = Engine::postgres(load_config(&cli)?).await?;
            cli::show_queue(engine.queue().stats().await?, mode)?;
        }
        Some(Commands::Audit { bet_id }) => {
            init_logging_simple();
            let engine = Engine::postgres(load_config(&cli)?).await?;
            let events = engine.wagers().audit_trail(*bet_id).await?;
            cli::show_audit_trail(&events, mode)?;
        }
        Some(Commands::Override {
            bet_id,
            actor,
            choice,
        }) => {
            init_logging_simple();
            let engine = Engine::postgres(load_config(&cli)?).await?;
            let outcome = engine
                .wagers()
                .manual_override(*bet_id, *actor, choice, Utc::now())
                .await?;
            if outcome.is_duplicate() {
                println!("An override for {} is already queued", bet_id);
            } else {
                println!("Override queued as job {}", outcome.job_id());
            }
        }
        Some(Commands::Poll { league }) => {
            init_logging_simple();
            let config = load_config(&cli)?;
            let games = poll_league(&config, *league).await?;
            cli::show_games(&games, mode)?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(WagerError::Validation(errors.join("; ")));
    }
    Ok(config)
}

/// Console logging plus an optional daily-rolling file under WAGERD_LOG_DIR.
///
/// The returned guard must live as long as the process so the file writer
/// flushes on exit.
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},wagerd=debug,sqlx=warn", config.level))
    });

    let (file_layer, guard) = match std::env::var("WAGERD_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wagerd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
    guard
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn run_engine(config: AppConfig) -> Result<()> {
    info!("Starting wager resolution engine (wagerd)");
    let health_port = config.health_port.unwrap_or(8080);

    let engine = Arc::new(Engine::postgres(config).await?);

    let health_server = HealthServer::new(engine.health_state(), health_port);
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!("Health server error: {}", e);
        }
    });

    engine.start().await;

    let status_handle = {
        let metrics = Arc::clone(engine.metrics());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                metrics.log_status();
            }
        })
    };

    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    install_signal_handlers(Arc::clone(&shutdown));
    shutdown.requested().await;

    if let Err(e) = engine.shutdown(&shutdown).await {
        warn!("Shutdown incomplete: {}", e);
    }
    status_handle.abort();
    health_handle.abort();

    info!("{}", engine.metrics().summary());
    Ok(())
}

/// One scoreboard poll through the same provider path the engine uses
async fn poll_league(config: &AppConfig, league: League) -> Result<Vec<GameSnapshot>> {
    let Some(feed) = config.feeds.for_league(league) else {
        return Err(WagerError::Validation(format!("{} has no live feed", league)));
    };
    let source: Arc<dyn GameSource> = if league == League::Nfl {
        Arc::new(EspnNflSource::new(feed)?)
    } else {
        Arc::new(NbaCdnSource::new(feed)?)
    };

    let snapshots = Arc::new(GameSnapshotStore::new(
        Arc::new(MemoryCache::new()),
        std::time::Duration::from_secs(config.baseline.snapshot_ttl_secs),
    ));
    let provider = GameFeedProvider::new(
        source,
        feed.clone(),
        config.breaker.clone(),
        Arc::clone(&snapshots),
        Arc::new(Metrics::new()),
    );
    let summary = provider.poll_once().await?;
    info!(
        "Polled {}: {} games, {} details, {} failures",
        league, summary.scoreboard_games, summary.details_fetched, summary.detail_failures
    );

    let mut games: Vec<_> = snapshots
        .games(league)
        .into_iter()
        .map(|g| (*g).clone())
        .collect();
    games.sort_by(|a, b| a.game_id.cmp(&b.game_id));
    Ok(games)
}
