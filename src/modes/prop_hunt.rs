//! Prop hunt
//!
//! A player's gain in one stat since the baseline. Reaching the line settles
//! Over at once; otherwise the wager settles Under at the checkpoint.

use super::rules::{Checkpoint, Decision, ModeRules, OVER, UNDER};
use crate::domain::{content_signature, GameSnapshot, ModeKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PropHuntConfig {
    pub player_id: String,
    pub stat: String,
    pub line: f64,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropHuntStats {
    pub value: f64,
}

pub struct PropHunt {
    key: ModeKey,
}

impl PropHunt {
    pub fn new(key: ModeKey) -> Self {
        Self { key }
    }
}

impl ModeRules for PropHunt {
    type Config = PropHuntConfig;
    type Stats = PropHuntStats;

    fn key(&self) -> ModeKey {
        self.key
    }

    fn check(&self, config: &PropHuntConfig) -> std::result::Result<(), String> {
        if !config.line.is_finite() || config.line <= 0.0 {
            return Err("line must be positive".to_string());
        }
        if config.stat.trim().is_empty() {
            return Err("stat must not be empty".to_string());
        }
        Ok(())
    }

    fn choices(&self, _config: &PropHuntConfig) -> Vec<String> {
        vec![OVER.to_string(), UNDER.to_string()]
    }

    fn extract(&self, config: &PropHuntConfig, game: &GameSnapshot) -> Option<PropHuntStats> {
        Some(PropHuntStats {
            value: game
                .player_stat(&config.player_id, &config.stat)
                .unwrap_or(0.0),
        })
    }

    fn decide(
        &self,
        config: &PropHuntConfig,
        baseline: &PropHuntStats,
        current: &PropHuntStats,
        game: &GameSnapshot,
    ) -> Decision {
        if current.value - baseline.value >= config.line {
            Decision::Resolve(OVER.to_string())
        } else if config.checkpoint.reached(game) {
            Decision::Resolve(UNDER.to_string())
        } else {
            Decision::Pending
        }
    }

    fn game_signature(&self, game: &GameSnapshot) -> String {
        content_signature(&(game.status, game.period, &game.players))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures;
    use crate::domain::{GameStatus, League};

    fn config(rules: &PropHunt) -> PropHuntConfig {
        rules
            .parse_config(&serde_json::json!({"player_id": "7", "stat": "rushingYards", "line": 50}))
            .unwrap()
    }

    #[test]
    fn test_over_as_soon_as_line_is_reached() {
        let rules = PropHunt::new(ModeKey::NflPropHunt);
        let config = config(&rules);
        let mut game = fixtures::snapshot(League::Nfl, "g1", 0, 0);
        fixtures::set_player_stat(&mut game, "7", "rushingYards", 30.0);
        let baseline = rules.extract(&config, &game).unwrap();

        fixtures::set_player_stat(&mut game, "7", "rushingYards", 79.0);
        let current = rules.extract(&config, &game).unwrap();
        assert_eq!(rules.decide(&config, &baseline, &current, &game), Decision::Pending);

        fixtures::set_player_stat(&mut game, "7", "rushingYards", 80.0);
        let current = rules.extract(&config, &game).unwrap();
        assert_eq!(
            rules.decide(&config, &baseline, &current, &game),
            Decision::Resolve(OVER.into())
        );
    }

    #[test]
    fn test_under_at_checkpoint() {
        let rules = PropHunt::new(ModeKey::NbaPropHunt);
        let config = config(&rules);
        let mut game = fixtures::snapshot(League::Nba, "g1", 0, 0);
        let baseline = rules.extract(&config, &game).unwrap();
        game.status = GameStatus::Final;
        assert_eq!(
            rules.decide(&config, &baseline, &baseline, &game),
            Decision::Resolve(UNDER.into())
        );
    }
}
