//! NBA live data CDN client
//!
//! `todaysScoreboard_00.json` for the slate and `boxscore_{gameId}.json`
//! for player statistics. NBA payloads carry no scoring-play list.

use crate::config::FeedConfig;
use crate::domain::{GameSnapshot, GameStatus, League, PlayerLine, TeamLine};
use crate::error::{Result, WagerError};
use crate::feed::GameSource;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ScoreboardEnvelope {
    scoreboard: Scoreboard,
}

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    games: Vec<NbaGame>,
}

#[derive(Debug, Deserialize)]
struct BoxscoreEnvelope {
    game: NbaGame,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaGame {
    game_id: String,
    /// 1 scheduled, 2 live, 3 final
    game_status: u8,
    #[serde(default)]
    game_status_text: String,
    #[serde(default)]
    period: u8,
    #[serde(default)]
    game_clock: String,
    home_team: NbaTeam,
    away_team: NbaTeam,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaTeam {
    team_id: i64,
    #[serde(default)]
    team_tricode: String,
    #[serde(default)]
    team_city: String,
    #[serde(default)]
    team_name: String,
    #[serde(default)]
    score: i32,
    #[serde(default)]
    players: Vec<NbaPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaPlayer {
    person_id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    statistics: BTreeMap<String, serde_json::Value>,
}

fn parse_status(game: &NbaGame) -> GameStatus {
    match game.game_status {
        1 => GameStatus::Scheduled,
        2 if game.game_status_text.eq_ignore_ascii_case("halftime") => GameStatus::Halftime,
        2 => GameStatus::InProgress,
        3 => GameStatus::Final,
        _ => GameStatus::Unknown,
    }
}

/// "PT05M42.00S" -> "5:42"
fn parse_clock(iso: &str) -> String {
    let Some(rest) = iso.strip_prefix("PT") else {
        return iso.to_string();
    };
    let (mins, rest) = rest.split_once('M').unwrap_or(("0", rest));
    let secs = rest.trim_end_matches('S');
    let mins: u32 = mins.parse().unwrap_or(0);
    let secs: f64 = secs.parse().unwrap_or(0.0);
    format!("{}:{:02}", mins, secs.floor() as u32)
}

fn team_line(team: &NbaTeam) -> TeamLine {
    TeamLine {
        team_id: team.team_id.to_string(),
        abbreviation: team.team_tricode.clone(),
        name: format!("{} {}", team.team_city, team.team_name)
            .trim()
            .to_string(),
        score: team.score,
    }
}

fn player_lines(team: &NbaTeam, into: &mut BTreeMap<String, PlayerLine>) {
    for player in &team.players {
        let stats = player
            .statistics
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect();
        let athlete_id = player.person_id.to_string();
        into.insert(
            athlete_id.clone(),
            PlayerLine {
                athlete_id,
                name: player.name.clone(),
                team_id: team.team_id.to_string(),
                stats,
            },
        );
    }
}

fn to_snapshot(game: &NbaGame) -> GameSnapshot {
    let mut players = BTreeMap::new();
    player_lines(&game.home_team, &mut players);
    player_lines(&game.away_team, &mut players);

    GameSnapshot {
        league: League::Nba,
        game_id: game.game_id.clone(),
        status: parse_status(game),
        period: game.period,
        clock: parse_clock(&game.game_clock),
        home: team_line(&game.home_team),
        away: team_line(&game.away_team),
        scoring_plays: Vec::new(),
        players,
        fetched_at: Utc::now(),
        signature: String::new(),
    }
    .sealed()
}

/// NBA CDN live data source
pub struct NbaCdnSource {
    http: reqwest::Client,
    scoreboard_url: String,
    boxscore_base: String,
}

impl NbaCdnSource {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("wagerd/0.1")
            .build()?;
        Ok(Self {
            http,
            scoreboard_url: config.scoreboard_url.clone(),
            boxscore_base: config.summary_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        // The CDN answers 403 for boxscores that do not exist yet
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WagerError::GameNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(WagerError::UpstreamUnavailable(format!(
                "NBA CDN returned {} for {}",
                status, url
            )));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GameSource for NbaCdnSource {
    fn name(&self) -> &'static str {
        "nba-cdn"
    }

    fn league(&self) -> League {
        League::Nba
    }

    async fn scoreboard(&self) -> Result<Vec<GameSnapshot>> {
        let data: ScoreboardEnvelope = self.get_json(&self.scoreboard_url).await?;
        let games: Vec<GameSnapshot> = data.scoreboard.games.iter().map(to_snapshot).collect();
        debug!("NBA CDN: fetched {} games", games.len());
        Ok(games)
    }

    async fn game(&self, game_id: &str) -> Result<GameSnapshot> {
        let url = format!("{}/boxscore_{}.json", self.boxscore_base, game_id);
        let data: BoxscoreEnvelope = self.get_json(&url).await?;
        Ok(to_snapshot(&data.game))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("PT05M42.00S"), "5:42");
        assert_eq!(parse_clock("PT00M07.90S"), "0:07");
        assert_eq!(parse_clock(""), "");
    }

    #[test]
    fn test_parse_boxscore() {
        let json = r#"{"game": {
            "gameId": "0022500626",
            "gameStatus": 2,
            "gameStatusText": "Q3 5:42",
            "period": 3,
            "gameClock": "PT05M42.00S",
            "homeTeam": {"teamId": 1610612738, "teamTricode": "BOS", "teamCity": "Boston",
                         "teamName": "Celtics", "score": 89,
                         "players": [{"personId": 1628369, "name": "Jayson Tatum",
                                      "statistics": {"points": 27, "reboundsTotal": 8, "minutes": "PT30M"}}]},
            "awayTeam": {"teamId": 1610612747, "teamTricode": "LAL", "teamCity": "Los Angeles",
                         "teamName": "Lakers", "score": 82, "players": []}
        }}"#;
        let data: BoxscoreEnvelope = serde_json::from_str(json).unwrap();
        let game = to_snapshot(&data.game);

        assert_eq!(game.league, League::Nba);
        assert_eq!(game.status, GameStatus::InProgress);
        assert_eq!(game.clock, "5:42");
        assert_eq!(game.home.name, "Boston Celtics");
        assert_eq!(game.total_points(), 171);
        assert_eq!(game.player_stat("1628369", "points"), Some(27.0));
        // Non-numeric stats are dropped
        assert_eq!(game.player_stat("1628369", "minutes"), Some(0.0));
    }

    #[test]
    fn test_halftime_status() {
        let json = r#"{"gameId": "1", "gameStatus": 2, "gameStatusText": "Halftime", "period": 2,
            "homeTeam": {"teamId": 1, "score": 50}, "awayTeam": {"teamId": 2, "score": 48}}"#;
        let game: NbaGame = serde_json::from_str(json).unwrap();
        assert_eq!(parse_status(&game), GameStatus::Halftime);
    }
}
