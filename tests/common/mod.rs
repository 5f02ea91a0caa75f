//! Shared harness for the integration tests: an in-memory engine fed by a
//! scripted upstream source.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wagerd::config::AppConfig;
use wagerd::domain::{
    BettingTable, GameSnapshot, GameStatus, League, MemberBalance, ModeKey, NewWager, ScoringKind,
    ScoringPlay, TeamLine, Wager,
};
use wagerd::error::{Result, WagerError};
use wagerd::feed::GameSource;
use wagerd::persistence::BetStore;
use wagerd::services::Engine;

pub const GAME_ID: &str = "401547417";

/// Upstream that serves whatever games the test last set
pub struct ScriptedSource {
    league: League,
    games: Mutex<Vec<GameSnapshot>>,
}

impl ScriptedSource {
    pub fn new(league: League) -> Self {
        Self {
            league,
            games: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, game: GameSnapshot) {
        let mut games = self.games.lock().unwrap();
        games.retain(|g| g.game_id != game.game_id);
        games.push(game);
    }
}

#[async_trait]
impl GameSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn league(&self) -> League {
        self.league
    }

    async fn scoreboard(&self) -> Result<Vec<GameSnapshot>> {
        Ok(self.games.lock().unwrap().clone())
    }

    async fn game(&self, game_id: &str) -> Result<GameSnapshot> {
        self.games
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.game_id == game_id)
            .cloned()
            .ok_or_else(|| WagerError::GameNotFound(game_id.to_string()))
    }
}

fn team(id: &str, abbr: &str, score: i32) -> TeamLine {
    TeamLine {
        team_id: id.to_string(),
        abbreviation: abbr.to_string(),
        name: abbr.to_string(),
        score,
    }
}

/// An NFL game in progress with the given scoring plays, home team first
pub fn nfl_game(status: GameStatus, plays: &[ScoringKind]) -> GameSnapshot {
    let scoring_plays: Vec<ScoringPlay> = plays
        .iter()
        .enumerate()
        .map(|(i, kind)| ScoringPlay {
            sequence: i as u32,
            kind: *kind,
            team_id: if i % 2 == 0 { "12" } else { "33" }.to_string(),
            period: Some(2),
            clock: None,
        })
        .collect();
    let points = |side: usize| -> i32 {
        plays
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == side)
            .map(|(_, k)| match k {
                ScoringKind::Touchdown => 7,
                ScoringKind::FieldGoal => 3,
                ScoringKind::Safety => 2,
                ScoringKind::Other => 0,
            })
            .sum()
    };

    GameSnapshot {
        league: League::Nfl,
        game_id: GAME_ID.to_string(),
        status,
        period: 2,
        clock: "7:12".to_string(),
        home: team("12", "KC", points(0)),
        away: team("33", "BAL", points(1)),
        scoring_plays,
        players: BTreeMap::new(),
        fetched_at: Utc::now(),
        signature: String::new(),
    }
    .sealed()
}

pub struct Harness {
    pub engine: Engine,
    pub source: Arc<ScriptedSource>,
    pub table_id: Uuid,
    pub host: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        let source = Arc::new(ScriptedSource::new(League::Nfl));
        let config = AppConfig::default_config("postgres://localhost/unused");
        let engine = Engine::in_memory(config, vec![source.clone() as Arc<dyn GameSource>]);

        let host = Uuid::new_v4();
        let table = BettingTable {
            id: Uuid::new_v4(),
            name: "Sunday Night".into(),
            host_user_id: host,
        };
        engine.store().create_table(&table).await.unwrap();

        Self {
            engine,
            source,
            table_id: table.id,
            host,
        }
    }

    pub async fn member(&self, funds: Decimal) -> Uuid {
        let user = Uuid::new_v4();
        self.engine
            .store()
            .deposit(self.table_id, user, funds)
            .await
            .unwrap();
        user
    }

    pub async fn balance(&self, user: Uuid) -> MemberBalance {
        self.engine
            .store()
            .balance(self.table_id, user)
            .await
            .unwrap()
    }

    /// Open a wager proposed at `proposed`
    pub async fn open(
        &self,
        mode: ModeKey,
        amount: Decimal,
        window_secs: i32,
        config: serde_json::Value,
        proposed: DateTime<Utc>,
    ) -> Wager {
        let request = NewWager {
            table_id: self.table_id,
            proposer_id: self.host,
            wager_amount: amount,
            time_limit_seconds: window_secs,
            mode_key: mode,
            league_game_id: (mode.league() != League::U2Pick).then(|| GAME_ID.to_string()),
            description: format!("{} test", mode),
            mode_config: config,
        };
        self.engine.wagers().create_bet(request, proposed).await.unwrap()
    }

    /// Open a wager whose window already elapsed
    pub async fn open_elapsed(&self, mode: ModeKey, amount: Decimal, config: serde_json::Value) -> Wager {
        let proposed = Utc::now() - Duration::seconds(90);
        self.open(mode, amount, 30, config, proposed).await
    }

    pub async fn guess(&self, wager: &Wager, user: Uuid, guess: &str) {
        self.engine
            .wagers()
            .submit_guess(wager.id, user, guess, wager.proposal_time)
            .await
            .unwrap();
    }

    pub async fn drain(&self) -> usize {
        self.engine.workers().drain("test-worker").await.unwrap()
    }

    pub async fn wager(&self, bet_id: Uuid) -> Wager {
        self.engine.wagers().wager(bet_id).await.unwrap()
    }
}
