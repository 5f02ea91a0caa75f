//! Mode rule seam
//!
//! A mode is a config type, a stats type and two pure functions: `extract`
//! pulls the tracked stats out of a game snapshot (used for the baseline and
//! for every later observation) and `decide` compares them. The validator
//! runtime around it is shared by every mode.

use crate::domain::{content_signature, GameSnapshot, GameStatus, ModeKey};
use crate::error::{Result, WagerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub const WASH_TIE: &str = "exact tie at checkpoint";
pub const WASH_PUSH: &str = "push: result landed on the line";
pub const WASH_INVALID_CONFIG: &str = "mode configuration could not be read";

/// What a mode concluded from the latest observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "value", rename_all = "snake_case")]
pub enum Decision {
    /// Not decidable yet
    Pending,
    Resolve(String),
    Wash(String),
}

/// When checkpoint-based modes settle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    #[default]
    Final,
    EndOfPeriod(u8),
}

impl Checkpoint {
    pub fn reached(&self, game: &GameSnapshot) -> bool {
        if game.is_final() {
            return true;
        }
        match self {
            Checkpoint::Final => false,
            Checkpoint::EndOfPeriod(n) => {
                game.period > *n || (*n == 2 && game.status == GameStatus::Halftime)
            }
        }
    }
}

/// Labels for modes that pick a side of the game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideLabels {
    #[serde(default = "default_home_label")]
    pub home_label: String,
    #[serde(default = "default_away_label")]
    pub away_label: String,
}

fn default_home_label() -> String {
    "Home".to_string()
}

fn default_away_label() -> String {
    "Away".to_string()
}

impl Default for SideLabels {
    fn default() -> Self {
        Self {
            home_label: default_home_label(),
            away_label: default_away_label(),
        }
    }
}

impl SideLabels {
    pub fn choices(&self) -> Vec<String> {
        vec![self.home_label.clone(), self.away_label.clone()]
    }

    pub fn check(&self) -> std::result::Result<(), String> {
        let (home, away) = (self.home_label.trim(), self.away_label.trim());
        if home.is_empty() || away.is_empty() {
            return Err("side labels must not be empty".to_string());
        }
        if home.eq_ignore_ascii_case(away) {
            return Err("side labels must differ".to_string());
        }
        Ok(())
    }
}

/// Both teams' scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub home: i32,
    pub away: i32,
}

impl ScoreLine {
    pub fn of(game: &GameSnapshot) -> Self {
        Self {
            home: game.home.score,
            away: game.away.score,
        }
    }

    pub fn total(&self) -> i32 {
        self.home + self.away
    }

    /// Scores, status and period only
    pub fn signature(game: &GameSnapshot) -> String {
        content_signature(&(game.status, game.period, Self::of(game)))
    }
}

pub const OVER: &str = "Over";
pub const UNDER: &str = "Under";

/// Over/under against a line; landing exactly on it is a push
pub fn over_under(value: f64, line: f64) -> Decision {
    if value > line {
        Decision::Resolve(OVER.to_string())
    } else if value < line {
        Decision::Resolve(UNDER.to_string())
    } else {
        Decision::Wash(WASH_PUSH.to_string())
    }
}

pub trait ModeRules: Send + Sync + 'static {
    type Config: DeserializeOwned + Send + Sync;
    type Stats: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    fn key(&self) -> ModeKey;

    /// Semantic checks beyond what deserialization enforces
    fn check(&self, _config: &Self::Config) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Parse and check a wager's mode config
    fn parse_config(&self, raw: &serde_json::Value) -> Result<Self::Config> {
        let invalid = |reason: String| WagerError::InvalidModeConfig {
            mode: self.key().to_string(),
            reason,
        };
        let value = if raw.is_null() {
            serde_json::json!({})
        } else {
            raw.clone()
        };
        let config: Self::Config =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        self.check(&config).map_err(invalid)?;
        Ok(config)
    }

    /// Choices members may guess
    fn choices(&self, config: &Self::Config) -> Vec<String>;

    /// Tracked stats, or `None` when the snapshot lacks what the mode needs
    fn extract(&self, config: &Self::Config, game: &GameSnapshot) -> Option<Self::Stats>;

    fn decide(
        &self,
        config: &Self::Config,
        baseline: &Self::Stats,
        current: &Self::Stats,
        game: &GameSnapshot,
    ) -> Decision;

    /// Signature used by the change gate; modes reading a subset of the
    /// snapshot narrow it so unrelated updates are skipped
    fn game_signature(&self, game: &GameSnapshot) -> String {
        game.signature.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures;
    use crate::domain::League;

    #[test]
    fn test_checkpoint_reached() {
        let mut g = fixtures::snapshot(League::Nfl, "g", 0, 0);
        g.period = 2;
        assert!(!Checkpoint::Final.reached(&g));
        assert!(!Checkpoint::EndOfPeriod(2).reached(&g));

        g.status = GameStatus::Halftime;
        assert!(Checkpoint::EndOfPeriod(2).reached(&g));

        g.status = GameStatus::InProgress;
        g.period = 3;
        assert!(Checkpoint::EndOfPeriod(2).reached(&g));
        assert!(!Checkpoint::EndOfPeriod(3).reached(&g));

        g.status = GameStatus::Final;
        assert!(Checkpoint::Final.reached(&g));
        assert!(Checkpoint::EndOfPeriod(4).reached(&g));
    }

    #[test]
    fn test_checkpoint_config_forms() {
        let c: Checkpoint = serde_json::from_str("\"final\"").unwrap();
        assert_eq!(c, Checkpoint::Final);
        let c: Checkpoint = serde_json::from_str(r#"{"end_of_period": 2}"#).unwrap();
        assert_eq!(c, Checkpoint::EndOfPeriod(2));
    }

    #[test]
    fn test_over_under() {
        assert_eq!(over_under(45.0, 44.5), Decision::Resolve(OVER.into()));
        assert_eq!(over_under(44.0, 44.5), Decision::Resolve(UNDER.into()));
        assert!(matches!(over_under(44.0, 44.0), Decision::Wash(_)));
    }
}
