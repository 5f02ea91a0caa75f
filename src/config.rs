use crate::domain::League;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (default: 8080)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Resolution job queue and worker pool
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts before a job is declared permanently failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Idle sleep between claim attempts
    #[serde(default = "default_queue_poll_ms")]
    pub poll_interval_ms: u64,
    /// Running jobs older than this are considered abandoned
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_queue_poll_ms() -> u64 {
    500
}

fn default_lease_secs() -> u64 {
    120
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            poll_interval_ms: default_queue_poll_ms(),
            lease_secs: default_lease_secs(),
        }
    }
}

/// Lifecycle scheduler (close timers and catch-up sweep)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_close_max_attempts")]
    pub close_max_attempts: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,
}

fn default_close_max_attempts() -> u32 {
    8
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_size() -> i64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            close_max_attempts: default_close_max_attempts(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

/// Circuit breaker around upstream feed calls
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Baseline / snapshot cache retention
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineConfig {
    /// Baseline time-to-live (default: 3 days)
    #[serde(default = "default_baseline_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
    #[serde(default = "default_signature_ttl")]
    pub signature_ttl_secs: u64,
}

fn default_baseline_ttl() -> u64 {
    3 * 24 * 3600
}

fn default_snapshot_ttl() -> u64 {
    12 * 3600
}

fn default_signature_ttl() -> u64 {
    24 * 3600
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_baseline_ttl(),
            snapshot_ttl_secs: default_snapshot_ttl(),
            signature_ttl_secs: default_signature_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "FeedConfig::nfl_defaults")]
    pub nfl: FeedConfig,
    #[serde(default = "FeedConfig::nba_defaults")]
    pub nba: FeedConfig,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            nfl: FeedConfig::nfl_defaults(),
            nba: FeedConfig::nba_defaults(),
        }
    }
}

impl FeedsConfig {
    pub fn for_league(&self, league: League) -> Option<&FeedConfig> {
        match league {
            League::Nfl => Some(&self.nfl),
            League::Nba => Some(&self.nba),
            League::U2Pick => None,
        }
    }
}

/// Per-league upstream poller settings
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub scoreboard_url: String,
    /// Per-game detail endpoint (ESPN summary or NBA boxscore base)
    pub summary_url: String,
    #[serde(default = "default_base_interval")]
    pub base_interval_secs: u64,
    #[serde(default = "default_max_multiplier")]
    pub max_backoff_multiplier: u32,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
    /// Random +/- spread applied to each sleep, in percent
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u8,
}

fn default_true() -> bool {
    true
}

fn default_base_interval() -> u64 {
    60
}

fn default_max_multiplier() -> u32 {
    8
}

fn default_feed_timeout() -> u64 {
    15
}

fn default_jitter_pct() -> u8 {
    10
}

impl FeedConfig {
    pub const MIN_INTERVAL_SECS: u64 = 10;
    pub const MAX_INTERVAL_SECS: u64 = 300;

    pub fn nfl_defaults() -> Self {
        Self {
            enabled: true,
            scoreboard_url: "https://site.api.espn.com/apis/site/v2/sports/football/nfl/scoreboard"
                .to_string(),
            summary_url: "https://site.api.espn.com/apis/site/v2/sports/football/nfl/summary"
                .to_string(),
            base_interval_secs: default_base_interval(),
            max_backoff_multiplier: default_max_multiplier(),
            timeout_secs: default_feed_timeout(),
            jitter_pct: default_jitter_pct(),
        }
    }

    pub fn nba_defaults() -> Self {
        Self {
            enabled: true,
            scoreboard_url:
                "https://cdn.nba.com/static/json/liveData/scoreboard/todaysScoreboard_00.json"
                    .to_string(),
            summary_url: "https://cdn.nba.com/static/json/liveData/boxscore".to_string(),
            base_interval_secs: 30,
            max_backoff_multiplier: default_max_multiplier(),
            timeout_secs: default_feed_timeout(),
            jitter_pct: default_jitter_pct(),
        }
    }

    /// Base poll interval clamped to the supported range
    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(
            self.base_interval_secs
                .clamp(Self::MIN_INTERVAL_SECS, Self::MAX_INTERVAL_SECS),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 10)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WAGERD_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WAGERD_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("WAGERD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for local runs and tests without any files
    pub fn default_config(database_url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: default_max_connections(),
            },
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            breaker: BreakerConfig::default(),
            baseline: BaselineConfig::default(),
            feeds: FeedsConfig::default(),
            logging: LoggingConfig::default(),
            health_port: Some(8080),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.queue.workers == 0 {
            errors.push("queue.workers must be at least 1".to_string());
        }

        if self.queue.max_attempts == 0 {
            errors.push("queue.max_attempts must be at least 1".to_string());
        }

        if self.queue.base_backoff_ms > self.queue.max_backoff_ms {
            errors.push("queue.base_backoff_ms must not exceed queue.max_backoff_ms".to_string());
        }

        if self.scheduler.sweep_interval_secs == 0 {
            errors.push("scheduler.sweep_interval_secs must be positive".to_string());
        }

        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be at least 1".to_string());
        }

        if self.baseline.ttl_secs == 0 {
            errors.push("baseline.ttl_secs must be positive".to_string());
        }

        for (name, feed) in [("nfl", &self.feeds.nfl), ("nba", &self.feeds.nba)] {
            if feed.max_backoff_multiplier == 0 {
                errors.push(format!("feeds.{name}.max_backoff_multiplier must be at least 1"));
            }
            if feed.jitter_pct >= 100 {
                errors.push(format!("feeds.{name}.jitter_pct must be below 100"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
