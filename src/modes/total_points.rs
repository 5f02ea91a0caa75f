//! Total points over/under

use super::rules::{over_under, Checkpoint, Decision, ModeRules, ScoreLine, OVER, UNDER};
use crate::domain::{GameSnapshot, ModeKey};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TotalPointsConfig {
    pub line: f64,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

pub struct TotalPoints {
    key: ModeKey,
}

impl TotalPoints {
    pub fn new(key: ModeKey) -> Self {
        Self { key }
    }
}

impl ModeRules for TotalPoints {
    type Config = TotalPointsConfig;
    type Stats = ScoreLine;

    fn key(&self) -> ModeKey {
        self.key
    }

    fn check(&self, config: &TotalPointsConfig) -> std::result::Result<(), String> {
        if !config.line.is_finite() || config.line < 0.0 {
            return Err("line must be a non-negative number".to_string());
        }
        Ok(())
    }

    fn choices(&self, _config: &TotalPointsConfig) -> Vec<String> {
        vec![OVER.to_string(), UNDER.to_string()]
    }

    fn extract(&self, _config: &TotalPointsConfig, game: &GameSnapshot) -> Option<ScoreLine> {
        Some(ScoreLine::of(game))
    }

    fn decide(
        &self,
        config: &TotalPointsConfig,
        _baseline: &ScoreLine,
        current: &ScoreLine,
        game: &GameSnapshot,
    ) -> Decision {
        if !config.checkpoint.reached(game) {
            return Decision::Pending;
        }
        over_under(f64::from(current.total()), config.line)
    }

    fn game_signature(&self, game: &GameSnapshot) -> String {
        ScoreLine::signature(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures;
    use crate::domain::{GameStatus, League};

    #[test]
    fn test_over_under_at_final() {
        let rules = TotalPoints::new(ModeKey::NflTotalPoints);
        let config = rules
            .parse_config(&serde_json::json!({"line": 44.5}))
            .unwrap();
        let mut game = fixtures::snapshot(League::Nfl, "g1", 24, 17);
        let stats = rules.extract(&config, &game).unwrap();
        assert_eq!(rules.decide(&config, &stats, &stats, &game), Decision::Pending);

        game.status = GameStatus::Final;
        assert_eq!(
            rules.decide(&config, &stats, &stats, &game),
            Decision::Resolve(UNDER.into())
        );
    }

    #[test]
    fn test_push_washes_at_halftime_checkpoint() {
        let rules = TotalPoints::new(ModeKey::NbaTotalPoints);
        let config = rules
            .parse_config(&serde_json::json!({"line": 110, "checkpoint": {"end_of_period": 2}}))
            .unwrap();
        let mut game = fixtures::snapshot(League::Nba, "g1", 56, 54);
        game.period = 2;
        game.status = GameStatus::Halftime;
        let stats = rules.extract(&config, &game).unwrap();
        assert!(matches!(
            rules.decide(&config, &stats, &stats, &game),
            Decision::Wash(_)
        ));
    }

    #[test]
    fn test_missing_line_is_invalid() {
        let rules = TotalPoints::new(ModeKey::NflTotalPoints);
        assert!(rules.parse_config(&serde_json::json!({})).is_err());
        assert!(rules.parse_config(&serde_json::json!({"line": -3})).is_err());
    }
}
