//! Point spread
//!
//! The spread is applied to the home team: home covers when
//! `home + spread > away`. Landing exactly on the number is a push.

use super::rules::{Checkpoint, Decision, ModeRules, ScoreLine, SideLabels, WASH_PUSH};
use crate::domain::{GameSnapshot, ModeKey};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SpreadConfig {
    pub spread: f64,
    #[serde(flatten)]
    pub labels: SideLabels,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

pub struct Spread {
    key: ModeKey,
}

impl Spread {
    pub fn new(key: ModeKey) -> Self {
        Self { key }
    }
}

impl ModeRules for Spread {
    type Config = SpreadConfig;
    type Stats = ScoreLine;

    fn key(&self) -> ModeKey {
        self.key
    }

    fn check(&self, config: &SpreadConfig) -> std::result::Result<(), String> {
        if !config.spread.is_finite() {
            return Err("spread must be a number".to_string());
        }
        config.labels.check()
    }

    fn choices(&self, config: &SpreadConfig) -> Vec<String> {
        config.labels.choices()
    }

    fn extract(&self, _config: &SpreadConfig, game: &GameSnapshot) -> Option<ScoreLine> {
        Some(ScoreLine::of(game))
    }

    fn decide(
        &self,
        config: &SpreadConfig,
        _baseline: &ScoreLine,
        current: &ScoreLine,
        game: &GameSnapshot,
    ) -> Decision {
        if !config.checkpoint.reached(game) {
            return Decision::Pending;
        }
        let margin = f64::from(current.home) + config.spread - f64::from(current.away);
        if margin > 0.0 {
            Decision::Resolve(config.labels.home_label.clone())
        } else if margin < 0.0 {
            Decision::Resolve(config.labels.away_label.clone())
        } else {
            Decision::Wash(WASH_PUSH.to_string())
        }
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

    fn final_game(home: i32, away: i32) -> GameSnapshot {
        let mut game = fixtures::snapshot(League::Nfl, "g1", home, away);
        game.status = GameStatus::Final;
        game
    }

    #[test]
    fn test_favorite_must_cover() {
        let rules = Spread::new(ModeKey::NflSpread);
        let config = rules
            .parse_config(&serde_json::json!({"spread": -3.5, "home_label": "KC", "away_label": "BUF"}))
            .unwrap();
        assert_eq!(rules.choices(&config), vec!["KC".to_string(), "BUF".to_string()]);

        let game = final_game(27, 24);
        let s = rules.extract(&config, &game).unwrap();
        assert_eq!(
            rules.decide(&config, &s, &s, &game),
            Decision::Resolve("BUF".into())
        );

        let game = final_game(28, 24);
        let s = rules.extract(&config, &game).unwrap();
        assert_eq!(
            rules.decide(&config, &s, &s, &game),
            Decision::Resolve("KC".into())
        );
    }

    #[test]
    fn test_push_washes() {
        let rules = Spread::new(ModeKey::NbaSpread);
        let config = rules.parse_config(&serde_json::json!({"spread": -4})).unwrap();
        let game = final_game(104, 100);
        let s = rules.extract(&config, &game).unwrap();
        assert!(matches!(rules.decide(&config, &s, &s, &game), Decision::Wash(_)));
    }
}
