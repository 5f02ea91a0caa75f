//! NFL next scoring play
//!
//! The first scoring play recorded after the baseline decides the wager.
//! Touchdown, field goal and safety counts all come from the ordered
//! scoring-play list; plays of other kinds are skipped.

use super::rules::{Decision, ModeRules};
use crate::domain::{content_signature, GameSnapshot, ModeKey, ScoringCounts, ScoringKind};
use serde::{Deserialize, Serialize};

pub const TOUCHDOWN: &str = "TD";
pub const FIELD_GOAL: &str = "FG";
pub const SAFETY: &str = "Safety";
pub const NO_MORE_SCORES: &str = "No More Scores";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextScoreConfig {
    /// Only count plays by this team (id or abbreviation)
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextScoreStats {
    /// Scoring plays already on the board
    pub plays: u32,
    pub counts: ScoringCounts,
}

pub struct NextScore;

impl NextScore {
    fn team_id<'a>(config: &'a NextScoreConfig, game: &'a GameSnapshot) -> Option<&'a str> {
        config
            .team
            .as_deref()
            .map(|t| game.team(t).map_or(t, |line| line.team_id.as_str()))
    }

    fn choice_for(kind: ScoringKind) -> Option<&'static str> {
        match kind {
            ScoringKind::Touchdown => Some(TOUCHDOWN),
            ScoringKind::FieldGoal => Some(FIELD_GOAL),
            ScoringKind::Safety => Some(SAFETY),
            ScoringKind::Other => None,
        }
    }
}

impl ModeRules for NextScore {
    type Config = NextScoreConfig;
    type Stats = NextScoreStats;

    fn key(&self) -> ModeKey {
        ModeKey::NflNextScore
    }

    fn choices(&self, _config: &NextScoreConfig) -> Vec<String> {
        [TOUCHDOWN, FIELD_GOAL, SAFETY, NO_MORE_SCORES]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn extract(&self, config: &NextScoreConfig, game: &GameSnapshot) -> Option<NextScoreStats> {
        Some(NextScoreStats {
            plays: game.scoring_plays.len() as u32,
            counts: game.scoring_counts(Self::team_id(config, game)),
        })
    }

    fn decide(
        &self,
        config: &NextScoreConfig,
        baseline: &NextScoreStats,
        _current: &NextScoreStats,
        game: &GameSnapshot,
    ) -> Decision {
        let team = Self::team_id(config, game);
        let mut fresh: Vec<_> = game
            .scoring_plays
            .iter()
            .filter(|p| p.sequence >= baseline.plays)
            .filter(|p| team.map_or(true, |t| p.team_id == t))
            .collect();
        fresh.sort_by_key(|p| p.sequence);

        if let Some(choice) = fresh.iter().find_map(|p| Self::choice_for(p.kind)) {
            return Decision::Resolve(choice.to_string());
        }
        if game.is_final() {
            return Decision::Resolve(NO_MORE_SCORES.to_string());
        }
        Decision::Pending
    }

    fn game_signature(&self, game: &GameSnapshot) -> String {
        content_signature(&(game.status, &game.scoring_plays))
    }
}
