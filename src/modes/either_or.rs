//! Either-or stat leader
//!
//! Two players; whoever gains more of one stat between the baseline and the
//! checkpoint wins. An exact tie washes.

use super::rules::{Checkpoint, Decision, ModeRules, WASH_TIE};
use crate::domain::{content_signature, GameSnapshot, ModeKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct EitherOrConfig {
    pub player1_id: String,
    pub player2_id: String,
    #[serde(default)]
    pub player1_name: Option<String>,
    #[serde(default)]
    pub player2_name: Option<String>,
    pub stat: String,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

impl EitherOrConfig {
    fn label1(&self) -> &str {
        self.player1_name.as_deref().unwrap_or(&self.player1_id)
    }

    fn label2(&self) -> &str {
        self.player2_name.as_deref().unwrap_or(&self.player2_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EitherOrStats {
    pub player1: f64,
    pub player2: f64,
}

pub struct EitherOr {
    key: ModeKey,
}

impl EitherOr {
    pub fn new(key: ModeKey) -> Self {
        Self { key }
    }
}

impl ModeRules for EitherOr {
    type Config = EitherOrConfig;
    type Stats = EitherOrStats;

    fn key(&self) -> ModeKey {
        self.key
    }

    fn check(&self, config: &EitherOrConfig) -> std::result::Result<(), String> {
        if config.player1_id == config.player2_id {
            return Err("player1_id and player2_id must differ".to_string());
        }
        if config.label1().eq_ignore_ascii_case(config.label2()) {
            return Err("players need distinct names".to_string());
        }
        if config.stat.trim().is_empty() {
            return Err("stat must not be empty".to_string());
        }
        Ok(())
    }

    fn choices(&self, config: &EitherOrConfig) -> Vec<String> {
        vec![config.label1().to_string(), config.label2().to_string()]
    }

    // Players missing from the box score have not recorded anything yet
    fn extract(&self, config: &EitherOrConfig, game: &GameSnapshot) -> Option<EitherOrStats> {
        Some(EitherOrStats {
            player1: game
                .player_stat(&config.player1_id, &config.stat)
                .unwrap_or(0.0),
            player2: game
                .player_stat(&config.player2_id, &config.stat)
                .unwrap_or(0.0),
        })
    }

    fn decide(
        &self,
        config: &EitherOrConfig,
        baseline: &EitherOrStats,
        current: &EitherOrStats,
        game: &GameSnapshot,
    ) -> Decision {
        if !config.checkpoint.reached(game) {
            return Decision::Pending;
        }
        let gain1 = current.player1 - baseline.player1;
        let gain2 = current.player2 - baseline.player2;
        if gain1 > gain2 {
            Decision::Resolve(config.label1().to_string())
        } else if gain2 > gain1 {
            Decision::Resolve(config.label2().to_string())
        } else {
            Decision::Wash(WASH_TIE.to_string())
        }
    }

    fn game_signature(&self, game: &GameSnapshot) -> String {
        content_signature(&(game.status, game.period, &game.players))
    }
}
