//! Choose the winner (or the leader at an earlier checkpoint)

use super::rules::{Checkpoint, Decision, ModeRules, ScoreLine, SideLabels, WASH_TIE};
use crate::domain::{GameSnapshot, ModeKey};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChooseWinnerConfig {
    #[serde(flatten)]
    pub labels: SideLabels,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

pub struct ChooseWinner {
    key: ModeKey,
}

impl ChooseWinner {
    pub fn new(key: ModeKey) -> Self {
        Self { key }
    }
}

impl ModeRules for ChooseWinner {
    type Config = ChooseWinnerConfig;
    type Stats = ScoreLine;

    fn key(&self) -> ModeKey {
        self.key
    }

    fn check(&self, config: &ChooseWinnerConfig) -> std::result::Result<(), String> {
        config.labels.check()
    }

    fn choices(&self, config: &ChooseWinnerConfig) -> Vec<String> {
        config.labels.choices()
    }

    fn extract(&self, _config: &ChooseWinnerConfig, game: &GameSnapshot) -> Option<ScoreLine> {
        Some(ScoreLine::of(game))
    }

    fn decide(
        &self,
        config: &ChooseWinnerConfig,
        _baseline: &ScoreLine,
        current: &ScoreLine,
        game: &GameSnapshot,
    ) -> Decision {
        if !config.checkpoint.reached(game) {
            return Decision::Pending;
        }
        match current.home.cmp(&current.away) {
            std::cmp::Ordering::Greater => Decision::Resolve(config.labels.home_label.clone()),
            std::cmp::Ordering::Less => Decision::Resolve(config.labels.away_label.clone()),
            std::cmp::Ordering::Equal => Decision::Wash(WASH_TIE.to_string()),
        }
    }

    fn game_signature(&self, game: &GameSnapshot) -> String {
        ScoreLine::signature(game)
    }
}
