use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};
use uuid::Uuid;

use crate::domain::{AuditEvent, GameSnapshot, League};
use crate::error::Result;
use crate::persistence::QueueStats;
use crate::services::SweepSummary;

#[derive(Parser)]
#[command(name = "wagerd")]
#[command(version = "0.1.0")]
#[command(about = "Bet resolution and lifecycle engine for social wagering tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml plus the WAGERD_ENV overlay)
    #[arg(short, long, default_value = "config", env = "WAGERD_CONFIG_DIR")]
    pub config: String,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine: feeds, validators, workers, scheduler and health server
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Close overdue wagers once and drain the resolution queue
    Sweep,
    /// Show queue depth by status
    Jobs,
    /// Print a wager's audit trail
    Audit {
        /// Wager id
        bet_id: Uuid,
    },
    /// Settle a pending wager by hand as its host or proposer
    Override {
        /// Wager id
        bet_id: Uuid,
        /// Acting user id
        #[arg(long)]
        actor: Uuid,
        /// Winning choice
        #[arg(long)]
        choice: String,
    },
    /// Poll one league's upstream feed once and print the games
    Poll {
        /// nfl or nba
        #[arg(value_parser = parse_league)]
        league: League,
    },
}

fn parse_league(s: &str) -> std::result::Result<League, String> {
    League::try_from(s)
}

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
pub struct AuditRow {
    pub id: i64,
    pub at: String,
    pub event: String,
    pub payload: String,
}

impl From<&AuditEvent> for AuditRow {
    fn from(e: &AuditEvent) -> Self {
        Self {
            id: e.id,
            at: e.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            event: e.event_type.to_string(),
            payload: e.payload.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct GameRow {
    pub game_id: String,
    pub status: String,
    pub period: u8,
    pub clock: String,
    pub away: String,
    pub home: String,
    pub plays: usize,
    pub players: usize,
}

impl From<&GameSnapshot> for GameRow {
    fn from(g: &GameSnapshot) -> Self {
        Self {
            game_id: g.game_id.clone(),
            status: g.status.as_str().to_string(),
            period: g.period,
            clock: g.clock.clone(),
            away: format!("{} {}", g.away.abbreviation, g.away.score),
            home: format!("{} {}", g.home.abbreviation, g.home.score),
            plays: g.scoring_plays.len(),
            players: g.players.len(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct QueueRow {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl From<QueueStats> for QueueRow {
    fn from(s: QueueStats) -> Self {
        Self {
            queued: s.queued,
            running: s.running,
            completed: s.completed,
            failed: s.failed,
        }
    }
}

pub fn show_audit_trail(events: &[AuditEvent], mode: OutputMode) -> Result<()> {
    if mode == OutputMode::Json {
        println!("{}", serde_json::to_string_pretty(events)?);
        return Ok(());
    }
    let rows: Vec<AuditRow> = events.iter().map(AuditRow::from).collect();
    print_items(&rows, mode)
}

pub fn show_games(games: &[GameSnapshot], mode: OutputMode) -> Result<()> {
    let rows: Vec<GameRow> = games.iter().map(GameRow::from).collect();
    print_items(&rows, mode)
}

pub fn show_queue(stats: QueueStats, mode: OutputMode) -> Result<()> {
    print_items(&[QueueRow::from(stats)], mode)
}

pub fn show_sweep(summary: &SweepSummary, drained: usize) {
    println!(
        "Swept {} overdue wagers: {} closed, {} washed, {} skipped, {} failed; {} jobs processed",
        summary.scanned, summary.closed, summary.washed, summary.skipped, summary.failed, drained
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_override_command() {
        let bet = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "wagerd",
            "override",
            &bet.to_string(),
            "--actor",
            &actor.to_string(),
            "--choice",
            "Over",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Override {
                bet_id,
                actor: a,
                choice,
            }) => {
                assert_eq!(bet_id, bet);
                assert_eq!(a, actor);
                assert_eq!(choice, "Over");
            }
            _ => panic!("expected override"),
        }
    }

    #[test]
    fn test_parse_poll_league() {
        let cli = Cli::try_parse_from(["wagerd", "poll", "NBA", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Poll { league: League::Nba })));
        assert!(Cli::try_parse_from(["wagerd", "poll", "mlb"]).is_err());
    }
}
