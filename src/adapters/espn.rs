//! ESPN NFL Client
//!
//! Scoreboard for the day's games plus the per-event summary endpoint for
//! boxscore players and scoring plays. No API key required.

use crate::config::FeedConfig;
use crate::domain::{
    GameSnapshot, GameStatus, League, PlayerLine, ScoringKind, ScoringPlay, TeamLine,
};
use crate::error::{Result, WagerError};
use crate::feed::GameSource;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

// ── ESPN JSON deserialization structs ────────────────────────────

#[derive(Debug, Deserialize)]
struct ScoreboardResponse {
    #[serde(default)]
    events: Vec<EspnEvent>,
}

#[derive(Debug, Deserialize)]
struct EspnEvent {
    id: String,
    #[serde(default)]
    competitions: Vec<EspnCompetition>,
}

#[derive(Debug, Deserialize)]
struct EspnCompetition {
    #[serde(default)]
    competitors: Vec<EspnCompetitor>,
    status: Option<EspnStatus>,
}

#[derive(Debug, Deserialize)]
struct EspnCompetitor {
    team: EspnTeam,
    #[serde(rename = "homeAway")]
    home_away: String,
    score: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EspnTeam {
    id: Option<String>,
    #[serde(default)]
    abbreviation: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct EspnStatus {
    period: Option<u8>,
    #[serde(rename = "displayClock")]
    display_clock: Option<String>,
    #[serde(rename = "type")]
    status_type: Option<EspnStatusType>,
}

#[derive(Debug, Deserialize)]
struct EspnStatusType {
    name: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    header: SummaryHeader,
    boxscore: Option<Boxscore>,
    #[serde(rename = "scoringPlays", default)]
    scoring_plays: Vec<EspnScoringPlay>,
}

#[derive(Debug, Deserialize)]
struct SummaryHeader {
    id: Option<String>,
    #[serde(default)]
    competitions: Vec<EspnCompetition>,
}

#[derive(Debug, Deserialize)]
struct Boxscore {
    #[serde(default)]
    players: Vec<TeamPlayers>,
}

#[derive(Debug, Deserialize)]
struct TeamPlayers {
    team: EspnTeam,
    #[serde(default)]
    statistics: Vec<StatCategory>,
}

#[derive(Debug, Deserialize)]
struct StatCategory {
    name: Option<String>,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    athletes: Vec<AthleteStats>,
}

#[derive(Debug, Deserialize)]
struct AthleteStats {
    athlete: EspnAthlete,
    #[serde(default)]
    stats: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EspnAthlete {
    id: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct EspnScoringPlay {
    #[serde(default)]
    team: EspnTeam,
    #[serde(rename = "scoringType")]
    scoring_type: Option<Abbreviated>,
    #[serde(rename = "type")]
    play_type: Option<Abbreviated>,
    period: Option<PeriodNumber>,
    clock: Option<DisplayValue>,
}

#[derive(Debug, Deserialize)]
struct Abbreviated {
    abbreviation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeriodNumber {
    number: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct DisplayValue {
    #[serde(rename = "displayValue")]
    display_value: Option<String>,
}

// ── Parsing ──────────────────────────────────────────────────────

/// Status from ESPN's `type.name`, falling back to `type.state`
fn parse_status(status: Option<&EspnStatus>) -> GameStatus {
    let Some(status_type) = status.and_then(|s| s.status_type.as_ref()) else {
        return GameStatus::Unknown;
    };

    if let Some(name) = status_type.name.as_deref() {
        let name = name.trim().to_ascii_uppercase();
        if name.contains("FINAL") {
            return GameStatus::Final;
        }
        if name.contains("HALFTIME") {
            return GameStatus::Halftime;
        }
        if name.contains("SCHEDULED") {
            return GameStatus::Scheduled;
        }
        if name.contains("IN_PROGRESS") || name.contains("END_PERIOD") {
            return GameStatus::InProgress;
        }
    }

    match status_type.state.as_deref().map(str::trim) {
        Some("pre") => GameStatus::Scheduled,
        Some("in") => GameStatus::InProgress,
        Some("post") => GameStatus::Final,
        Some("halftime") => GameStatus::Halftime,
        _ => GameStatus::Unknown,
    }
}

fn team_line(competitor: &EspnCompetitor) -> TeamLine {
    TeamLine {
        team_id: competitor.team.id.clone().unwrap_or_default(),
        abbreviation: competitor.team.abbreviation.clone(),
        name: competitor.team.display_name.clone(),
        score: competitor
            .score
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0),
    }
}

fn parse_competition(
    game_id: &str,
    comp: &EspnCompetition,
) -> std::result::Result<GameSnapshot, String> {
    let home = comp
        .competitors
        .iter()
        .find(|c| c.home_away == "home")
        .ok_or_else(|| format!("event {} has no home competitor", game_id))?;
    let away = comp
        .competitors
        .iter()
        .find(|c| c.home_away == "away")
        .ok_or_else(|| format!("event {} has no away competitor", game_id))?;

    let status = parse_status(comp.status.as_ref());
    let period = match status {
        GameStatus::Scheduled => 0,
        _ => comp.status.as_ref().and_then(|s| s.period).unwrap_or(0),
    };

    Ok(GameSnapshot {
        league: League::Nfl,
        game_id: game_id.to_string(),
        status,
        period,
        clock: comp
            .status
            .as_ref()
            .and_then(|s| s.display_clock.clone())
            .unwrap_or_default(),
        home: team_line(home),
        away: team_line(away),
        scoring_plays: Vec::new(),
        players: BTreeMap::new(),
        fetched_at: Utc::now(),
        signature: String::new(),
    })
}

/// ESPN stat strings: "87", "1,024", "--", or paired values like "12/20"
fn parse_number(raw: &str) -> f64 {
    let cleaned = raw.trim().replace(',', "");
    match cleaned.as_str() {
        "" | "-" | "--" | "N/A" => 0.0,
        s => s.parse().unwrap_or(0.0),
    }
}

/// Expand one category row into stat key/value pairs.
///
/// Compound keys such as `completions/passingAttempts` or
/// `sacks-sackYardsLost` are split into their parts.
fn category_stats(keys: &[String], values: &[String]) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let raw = values.get(i).map(String::as_str).unwrap_or("0");
        let split = ['/', '-']
            .into_iter()
            .find(|sep| key.contains(*sep) && raw.contains(*sep));
        match split {
            Some(sep) => {
                for (k, v) in key.split(sep).zip(raw.split(sep)) {
                    out.push((k.to_string(), parse_number(v)));
                }
            }
            None => out.push((key.clone(), parse_number(raw))),
        }
    }
    out
}

fn parse_players(boxscore: Option<&Boxscore>) -> BTreeMap<String, PlayerLine> {
    let mut players: BTreeMap<String, PlayerLine> = BTreeMap::new();
    let Some(boxscore) = boxscore else {
        return players;
    };

    for team in &boxscore.players {
        let team_id = team.team.id.clone().unwrap_or_default();
        for category in &team.statistics {
            for entry in &category.athletes {
                let Some(athlete_id) = entry.athlete.id.clone() else {
                    continue;
                };
                let line = players
                    .entry(athlete_id.clone())
                    .or_insert_with(|| PlayerLine {
                        athlete_id,
                        name: entry.athlete.display_name.clone(),
                        team_id: team_id.clone(),
                        stats: BTreeMap::new(),
                    });
                // Bare keys keep the first category's value; `category.key` is always exact
                for (key, value) in category_stats(&category.keys, &entry.stats) {
                    if let Some(name) = category.name.as_deref() {
                        line.stats.insert(format!("{}.{}", name, key), value);
                    }
                    line.stats.entry(key).or_insert(value);
                }
            }
        }
    }
    players
}

fn parse_scoring_plays(plays: &[EspnScoringPlay]) -> Vec<ScoringPlay> {
    plays
        .iter()
        .filter_map(|p| {
            let team_id = p.team.id.clone()?;
            let abbr = p
                .scoring_type
                .as_ref()
                .and_then(|t| t.abbreviation.as_deref())
                .or_else(|| p.play_type.as_ref().and_then(|t| t.abbreviation.as_deref()))
                .unwrap_or("");
            Some((team_id, ScoringKind::from_abbreviation(abbr), p))
        })
        .enumerate()
        .map(|(i, (team_id, kind, p))| ScoringPlay {
            sequence: i as u32,
            kind,
            team_id,
            period: p.period.as_ref().and_then(|n| n.number),
            clock: p.clock.as_ref().and_then(|c| c.display_value.clone()),
        })
        .collect()
}

fn parse_summary(game_id: &str, summary: &SummaryResponse) -> Result<GameSnapshot> {
    let id = summary.header.id.as_deref().unwrap_or(game_id);
    let comp = summary
        .header
        .competitions
        .first()
        .ok_or_else(|| WagerError::InvalidGameData(format!("summary {} has no competition", id)))?;

    let mut snapshot = parse_competition(id, comp).map_err(WagerError::InvalidGameData)?;
    snapshot.scoring_plays = parse_scoring_plays(&summary.scoring_plays);
    snapshot.players = parse_players(summary.boxscore.as_ref());
    Ok(snapshot.sealed())
}

// ── Client ──────────────────────────────────────────────────────

/// ESPN NFL live data source
pub struct EspnNflSource {
    http: reqwest::Client,
    scoreboard_url: String,
    summary_url: String,
}

impl EspnNflSource {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("wagerd/0.1")
            .build()?;
        Ok(Self {
            http,
            scoreboard_url: config.scoreboard_url.clone(),
            summary_url: config.summary_url.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let resp = self.http.get(url).query(query).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WagerError::GameNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(WagerError::UpstreamUnavailable(format!(
                "ESPN returned {} for {}",
                status, url
            )));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GameSource for EspnNflSource {
    fn name(&self) -> &'static str {
        "espn-nfl"
    }

    fn league(&self) -> League {
        League::Nfl
    }

    async fn scoreboard(&self) -> Result<Vec<GameSnapshot>> {
        let data: ScoreboardResponse = self.get_json(&self.scoreboard_url, &[]).await?;

        let mut games = Vec::new();
        for event in &data.events {
            let Some(comp) = event.competitions.first() else {
                continue;
            };
            match parse_competition(&event.id, comp) {
                Ok(game) => games.push(game.sealed()),
                Err(e) => debug!("ESPN: skipping event: {}", e),
            }
        }

        debug!("ESPN: fetched {} games", games.len());
        Ok(games)
    }

    async fn game(&self, game_id: &str) -> Result<GameSnapshot> {
        let summary: SummaryResponse = self
            .get_json(&self.summary_url, &[("event", game_id)])
            .await?;
        parse_summary(game_id, &summary)
    }
}
