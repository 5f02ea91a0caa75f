//! Normalized live game data
//!
//! Every feed adapter maps its upstream payload into a [`GameSnapshot`].
//! Snapshots carry a content signature so consumers can skip work when
//! nothing relevant changed between polls.

use super::League;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Game status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Halftime,
    Final,
    Unknown,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "STATUS_SCHEDULED",
            GameStatus::InProgress => "STATUS_IN_PROGRESS",
            GameStatus::Halftime => "STATUS_HALFTIME",
            GameStatus::Final => "STATUS_FINAL",
            GameStatus::Unknown => "STATUS_UNKNOWN",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type of an NFL scoring play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringKind {
    Touchdown,
    FieldGoal,
    Safety,
    Other,
}

impl ScoringKind {
    /// Map an upstream abbreviation ("TD", "FG", "S") to a kind
    pub fn from_abbreviation(abbr: &str) -> Self {
        match abbr.trim().to_ascii_uppercase().as_str() {
            "TD" => ScoringKind::Touchdown,
            "FG" => ScoringKind::FieldGoal,
            "S" | "SF" => ScoringKind::Safety,
            _ => ScoringKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringPlay {
    /// Position in the game's scoring order, starting at 0
    pub sequence: u32,
    pub kind: ScoringKind,
    pub team_id: String,
    pub period: Option<u8>,
    pub clock: Option<String>,
}

/// Scoring-play counts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringCounts {
    pub touchdowns: u32,
    pub field_goals: u32,
    pub safeties: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamLine {
    pub team_id: String,
    pub abbreviation: String,
    pub name: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLine {
    pub athlete_id: String,
    pub name: String,
    pub team_id: String,
    pub stats: BTreeMap<String, f64>,
}

/// One normalized observation of a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub league: League,
    pub game_id: String,
    pub status: GameStatus,
    pub period: u8,
    pub clock: String,
    pub home: TeamLine,
    pub away: TeamLine,
    pub scoring_plays: Vec<ScoringPlay>,
    /// Keyed by athlete id
    pub players: BTreeMap<String, PlayerLine>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
struct SignatureView<'a> {
    league: League,
    game_id: &'a str,
    status: GameStatus,
    period: u8,
    home: &'a TeamLine,
    away: &'a TeamLine,
    scoring_plays: &'a [ScoringPlay],
    players: &'a BTreeMap<String, PlayerLine>,
}

/// Hex SHA-256 of a value's JSON form
pub fn content_signature<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

impl GameSnapshot {
    /// Signature over every field that can affect a decision.
    ///
    /// The clock and fetch time are excluded so an idle clock tick does not
    /// look like a change.
    pub fn compute_signature(&self) -> String {
        content_signature(&SignatureView {
            league: self.league,
            game_id: &self.game_id,
            status: self.status,
            period: self.period,
            home: &self.home,
            away: &self.away,
            scoring_plays: &self.scoring_plays,
            players: &self.players,
        })
    }

    /// Stamp the signature and return self
    pub fn sealed(mut self) -> Self {
        self.signature = self.compute_signature();
        self
    }

    pub fn is_final(&self) -> bool {
        self.status == GameStatus::Final
    }

    pub fn total_points(&self) -> i32 {
        self.home.score + self.away.score
    }

    pub fn team(&self, team_id: &str) -> Option<&TeamLine> {
        if self.home.team_id == team_id || self.home.abbreviation.eq_ignore_ascii_case(team_id) {
            Some(&self.home)
        } else if self.away.team_id == team_id
            || self.away.abbreviation.eq_ignore_ascii_case(team_id)
        {
            Some(&self.away)
        } else {
            None
        }
    }

    /// Aggregate scoring plays per category, single-sourced from the play list
    pub fn scoring_counts(&self, team_id: Option<&str>) -> ScoringCounts {
        let mut counts = ScoringCounts::default();
        for play in &self.scoring_plays {
            if let Some(tid) = team_id {
                if play.team_id != tid {
                    continue;
                }
            }
            match play.kind {
                ScoringKind::Touchdown => counts.touchdowns += 1,
                ScoringKind::FieldGoal => counts.field_goals += 1,
                ScoringKind::Safety => counts.safeties += 1,
                ScoringKind::Other => {}
            }
        }
        counts
    }

    pub fn player(&self, athlete_id: &str) -> Option<&PlayerLine> {
        self.players.get(athlete_id)
    }

    /// Value of one stat for a player; a listed player without the stat has 0
    pub fn player_stat(&self, athlete_id: &str, stat: &str) -> Option<f64> {
        self.players
            .get(athlete_id)
            .map(|p| p.stats.get(stat).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn team(id: &str, abbr: &str, score: i32) -> TeamLine {
        TeamLine {
            team_id: id.to_string(),
            abbreviation: abbr.to_string(),
            name: abbr.to_string(),
            score,
        }
    }

    pub fn snapshot(league: League, game_id: &str, home: i32, away: i32) -> GameSnapshot {
        GameSnapshot {
            league,
            game_id: game_id.to_string(),
            status: GameStatus::InProgress,
            period: 1,
            clock: "15:00".to_string(),
            home: team("1", "HOM", home),
            away: team("2", "AWY", away),
            scoring_plays: Vec::new(),
            players: BTreeMap::new(),
            fetched_at: Utc::now(),
            signature: String::new(),
        }
        .sealed()
    }

    pub fn push_play(snapshot: &mut GameSnapshot, kind: ScoringKind, team_id: &str) {
        let sequence = snapshot.scoring_plays.len() as u32;
        snapshot.scoring_plays.push(ScoringPlay {
            sequence,
            kind,
            team_id: team_id.to_string(),
            period: Some(snapshot.period),
            clock: None,
        });
        snapshot.signature = snapshot.compute_signature();
    }

    pub fn set_player_stat(snapshot: &mut GameSnapshot, athlete_id: &str, stat: &str, value: f64) {
        let player = snapshot
            .players
            .entry(athlete_id.to_string())
            .or_insert_with(|| PlayerLine {
                athlete_id: athlete_id.to_string(),
                name: format!("Player {athlete_id}"),
                team_id: "1".to_string(),
                stats: BTreeMap::new(),
            });
        player.stats.insert(stat.to_string(), value);
        snapshot.signature = snapshot.compute_signature();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_signature_ignores_clock_and_fetch_time() {
        let a = snapshot(League::Nfl, "g1", 7, 3);
        let mut b = a.clone();
        b.clock = "11:42".to_string();
        b.fetched_at = a.fetched_at + chrono::Duration::seconds(60);
        assert_eq!(a.compute_signature(), b.compute_signature());

        b.home.score = 10;
        assert_ne!(a.compute_signature(), b.compute_signature());
    }

    #[test]
    fn test_scoring_counts_from_plays() {
        let mut g = snapshot(League::Nfl, "g1", 0, 0);
        push_play(&mut g, ScoringKind::Touchdown, "1");
        push_play(&mut g, ScoringKind::FieldGoal, "2");
        push_play(&mut g, ScoringKind::Touchdown, "2");
        push_play(&mut g, ScoringKind::Safety, "1");

        let all = g.scoring_counts(None);
        assert_eq!(all.touchdowns, 2);
        assert_eq!(all.field_goals, 1);
        assert_eq!(all.safeties, 1);

        let away = g.scoring_counts(Some("2"));
        assert_eq!(away.touchdowns, 1);
        assert_eq!(away.field_goals, 1);
        assert_eq!(away.safeties, 0);
    }

    #[test]
    fn test_scoring_kind_abbreviations() {
        assert_eq!(ScoringKind::from_abbreviation("td"), ScoringKind::Touchdown);
        assert_eq!(ScoringKind::from_abbreviation("FG"), ScoringKind::FieldGoal);
        assert_eq!(ScoringKind::from_abbreviation("S"), ScoringKind::Safety);
        assert_eq!(ScoringKind::from_abbreviation("2PT"), ScoringKind::Other);
    }

    #[test]
    fn test_team_lookup_by_id_or_abbreviation() {
        let g = snapshot(League::Nba, "g2", 101, 99);
        assert_eq!(g.team("1").map(|t| t.score), Some(101));
        assert_eq!(g.team("awy").map(|t| t.score), Some(99));
        assert!(g.team("LAL").is_none());
        assert_eq!(g.total_points(), 200);
    }
}
