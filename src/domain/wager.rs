use super::BetStatus;
use crate::error::{GuessError, Result, WagerError};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Guess recorded for members who joined but never picked
pub const NO_ENTRY: &str = "No Entry";

/// Sports league a wager is tied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum League {
    Nfl,
    Nba,
    /// Free-form propositions settled by the table host
    U2Pick,
}

impl League {
    pub const ALL: [League; 3] = [League::Nfl, League::Nba, League::U2Pick];

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Nfl => "nfl",
            League::Nba => "nba",
            League::U2Pick => "u2pick",
        }
    }

    /// Whether an upstream live-data feed exists for this league
    pub fn has_feed(&self) -> bool {
        !matches!(self, League::U2Pick)
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for League {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "nfl" => Ok(League::Nfl),
            "nba" => Ok(League::Nba),
            "u2pick" => Ok(League::U2Pick),
            _ => Err(format!("Unknown league: {}", s)),
        }
    }
}

/// Betting mode identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKey {
    NflNextScore,
    NflEitherOr,
    NflTotalPoints,
    NflSpread,
    NflPropHunt,
    NflChooseWinner,
    NbaEitherOr,
    NbaTotalPoints,
    NbaSpread,
    NbaPropHunt,
    NbaChooseWinner,
    #[serde(rename = "u2pick")]
    U2Pick,
}

impl ModeKey {
    pub const ALL: [ModeKey; 12] = [
        ModeKey::NflNextScore,
        ModeKey::NflEitherOr,
        ModeKey::NflTotalPoints,
        ModeKey::NflSpread,
        ModeKey::NflPropHunt,
        ModeKey::NflChooseWinner,
        ModeKey::NbaEitherOr,
        ModeKey::NbaTotalPoints,
        ModeKey::NbaSpread,
        ModeKey::NbaPropHunt,
        ModeKey::NbaChooseWinner,
        ModeKey::U2Pick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeKey::NflNextScore => "nfl_next_score",
            ModeKey::NflEitherOr => "nfl_either_or",
            ModeKey::NflTotalPoints => "nfl_total_points",
            ModeKey::NflSpread => "nfl_spread",
            ModeKey::NflPropHunt => "nfl_prop_hunt",
            ModeKey::NflChooseWinner => "nfl_choose_winner",
            ModeKey::NbaEitherOr => "nba_either_or",
            ModeKey::NbaTotalPoints => "nba_total_points",
            ModeKey::NbaSpread => "nba_spread",
            ModeKey::NbaPropHunt => "nba_prop_hunt",
            ModeKey::NbaChooseWinner => "nba_choose_winner",
            ModeKey::U2Pick => "u2pick",
        }
    }

    pub fn league(&self) -> League {
        use ModeKey::*;

        match self {
            NflNextScore | NflEitherOr | NflTotalPoints | NflSpread | NflPropHunt
            | NflChooseWinner => League::Nfl,
            NbaEitherOr | NbaTotalPoints | NbaSpread | NbaPropHunt | NbaChooseWinner => {
                League::Nba
            }
            U2Pick => League::U2Pick,
        }
    }

    /// Modes of a league
    pub fn for_league(league: League) -> Vec<ModeKey> {
        Self::ALL
            .iter()
            .copied()
            .filter(|m| m.league() == league)
            .collect()
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ModeKey {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        ModeKey::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown mode: {}", s))
    }
}

/// A table: the group of members wagering against each other
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettingTable {
    pub id: Uuid,
    pub name: String,
    pub host_user_id: Uuid,
}

/// A wager proposed to a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub table_id: Uuid,
    pub proposer_id: Uuid,
    pub wager_amount: Decimal,
    pub time_limit_seconds: i32,
    pub proposal_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub status: BetStatus,
    pub winning_choice: Option<String>,
    pub resolution_time: Option<DateTime<Utc>>,
    pub wash_reason: Option<String>,
    pub mode_key: ModeKey,
    pub league: League,
    pub league_game_id: Option<String>,
    pub description: String,
    pub mode_config: serde_json::Value,
}

impl Wager {
    /// Guesses can still be submitted or changed
    pub fn accepts_guesses(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Active && now < self.close_time
    }

    /// The acceptance window has elapsed
    pub fn is_due_to_close(&self, now: DateTime<Utc>) -> bool {
        self.status == BetStatus::Active && now >= self.close_time
    }

    /// Valid choices declared by the mode config, if any
    pub fn choices(&self) -> Vec<String> {
        self.mode_config
            .get("choices")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validate a guess against the current state and declared choices.
    ///
    /// Returns the guess as it should be stored: the declared choice's own
    /// spelling when choices exist, otherwise the trimmed input.
    pub fn check_guess(
        &self,
        guess: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<String, GuessError> {
        if self.status != BetStatus::Active {
            return Err(GuessError::Locked {
                status: self.status.to_string(),
            });
        }
        if now >= self.close_time {
            return Err(GuessError::WindowClosed {
                close_time: self.close_time,
            });
        }

        let guess = guess.trim();
        if guess.is_empty() {
            return Err(GuessError::Empty);
        }
        if guess == NO_ENTRY {
            return Ok(NO_ENTRY.to_string());
        }

        let choices = self.choices();
        if choices.is_empty() {
            return Ok(guess.to_string());
        }
        choices
            .iter()
            .find(|c| c.trim().eq_ignore_ascii_case(guess))
            .cloned()
            .ok_or_else(|| GuessError::NotAChoice {
                guess: guess.to_string(),
                choices,
            })
    }

    /// Window changes are only allowed while guesses are still accepted
    pub fn check_window_change(&self, time_limit_seconds: i32, now: DateTime<Utc>) -> Result<()> {
        if time_limit_seconds <= 0 {
            return Err(WagerError::Validation(
                "time_limit_seconds must be positive".to_string(),
            ));
        }
        if !self.accepts_guesses(now) {
            return Err(WagerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "window update".to_string(),
            });
        }
        Ok(())
    }

    pub fn close_time_for(proposal_time: DateTime<Utc>, time_limit_seconds: i32) -> DateTime<Utc> {
        proposal_time + Duration::seconds(i64::from(time_limit_seconds))
    }
}

/// Request to open a new wager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWager {
    pub table_id: Uuid,
    pub proposer_id: Uuid,
    pub wager_amount: Decimal,
    pub time_limit_seconds: i32,
    pub mode_key: ModeKey,
    pub league_game_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub mode_config: serde_json::Value,
}

impl NewWager {
    pub fn validate(&self) -> Result<()> {
        if self.wager_amount <= Decimal::ZERO {
            return Err(WagerError::Validation(
                "wager_amount must be positive".to_string(),
            ));
        }
        if self.wager_amount.normalize().scale() > 2 {
            return Err(WagerError::Validation(
                "wager_amount supports at most 2 decimal places".to_string(),
            ));
        }
        if self.time_limit_seconds <= 0 {
            return Err(WagerError::Validation(
                "time_limit_seconds must be positive".to_string(),
            ));
        }
        if self.mode_key.league().has_feed() && self.league_game_id.is_none() {
            return Err(WagerError::Validation(format!(
                "{} wagers require a league_game_id",
                self.mode_key
            )));
        }
        Ok(())
    }

    /// Materialize the wager as active at `now`
    pub fn into_wager(self, id: Uuid, now: DateTime<Utc>) -> Wager {
        Wager {
            id,
            table_id: self.table_id,
            proposer_id: self.proposer_id,
            wager_amount: self.wager_amount,
            time_limit_seconds: self.time_limit_seconds,
            proposal_time: now,
            close_time: Wager::close_time_for(now, self.time_limit_seconds),
            status: BetStatus::Active,
            winning_choice: None,
            resolution_time: None,
            wash_reason: None,
            league: self.mode_key.league(),
            mode_key: self.mode_key,
            league_game_id: self.league_game_id,
            description: self.description,
            mode_config: if self.mode_config.is_null() {
                serde_json::json!({})
            } else {
                self.mode_config
            },
        }
    }
}

/// A member's participation in a wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub bet_id: Uuid,
    pub user_id: Uuid,
    pub guess: String,
    pub submitted_at: DateTime<Utc>,
    /// Amount debited from `available` at close
    pub escrow_amount: Decimal,
    /// Amount added to `contingent` at close
    pub escrow_contingent: Decimal,
    pub payout: Option<Decimal>,
}

impl Participation {
    pub fn new(bet_id: Uuid, user_id: Uuid, guess: &str, now: DateTime<Utc>) -> Self {
        Self {
            bet_id,
            user_id,
            guess: guess.to_string(),
            submitted_at: now,
            escrow_amount: Decimal::ZERO,
            escrow_contingent: Decimal::ZERO,
            payout: None,
        }
    }

    /// Made a real pick (not the sentinel)
    pub fn is_entrant(&self) -> bool {
        let guess = self.guess.trim();
        !guess.is_empty() && guess != NO_ENTRY
    }
}

/// Notification that a wager changed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetStatusChange {
    pub bet_id: Uuid,
    pub status: BetStatus,
    pub mode_key: ModeKey,
    pub league: League,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_wager() -> NewWager {
        NewWager {
            table_id: Uuid::new_v4(),
            proposer_id: Uuid::new_v4(),
            wager_amount: dec!(10),
            time_limit_seconds: 90,
            mode_key: ModeKey::NflNextScore,
            league_game_id: Some("401547417".into()),
            description: "Next score".into(),
            mode_config: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_close_time_is_proposal_plus_window() {
        let now = Utc::now();
        let wager = new_wager().into_wager(Uuid::new_v4(), now);
        assert_eq!(wager.close_time, now + Duration::seconds(90));
        assert_eq!(wager.status, BetStatus::Active);
        assert_eq!(wager.league, League::Nfl);
        assert!(wager.accepts_guesses(now));
        assert!(!wager.accepts_guesses(wager.close_time));
        assert!(wager.is_due_to_close(wager.close_time));
    }

    #[test]
    fn test_new_wager_validation() {
        assert!(new_wager().validate().is_ok());

        let mut bad = new_wager();
        bad.wager_amount = dec!(0);
        assert!(bad.validate().is_err());

        let mut bad = new_wager();
        bad.wager_amount = dec!(1.005);
        assert!(bad.validate().is_err());

        let mut bad = new_wager();
        bad.league_game_id = None;
        assert!(bad.validate().is_err());

        let mut manual = new_wager();
        manual.mode_key = ModeKey::U2Pick;
        manual.league_game_id = None;
        assert!(manual.validate().is_ok());
    }

    #[test]
    fn test_trailing_zeros_are_not_extra_precision() {
        let mut request = new_wager();
        request.wager_amount = dec!(1.000);
        assert!(request.validate().is_ok());
        request.wager_amount = dec!(1.005);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_mode_key_wire_name_matches_column_value() {
        for mode in ModeKey::ALL {
            let json = serde_json::to_value(mode).unwrap();
            assert_eq!(json, serde_json::Value::String(mode.as_str().to_string()));
            let back: ModeKey = serde_json::from_value(json).unwrap();
            assert_eq!(back, mode);
        }
        for league in League::ALL {
            assert_eq!(
                serde_json::to_value(league).unwrap(),
                serde_json::Value::String(league.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_status_notification_for_manual_wager_parses() {
        let bet_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"bet_id":"{}","status":"pending","mode_key":"u2pick","league":"u2pick"}}"#,
            bet_id
        );
        let change: BetStatusChange = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            change,
            BetStatusChange {
                bet_id,
                status: BetStatus::Pending,
                mode_key: ModeKey::U2Pick,
                league: League::U2Pick,
            }
        );
    }

    #[test]
    fn test_no_entry_is_not_an_entrant() {
        let p = Participation::new(Uuid::nil(), Uuid::nil(), NO_ENTRY, Utc::now());
        assert!(!p.is_entrant());
        let p = Participation::new(Uuid::nil(), Uuid::nil(), "TD", Utc::now());
        assert!(p.is_entrant());
    }

    #[test]
    fn test_mode_key_parse_and_league() {
        for mode in ModeKey::ALL {
            assert_eq!(ModeKey::try_from(mode.as_str()).unwrap(), mode);
        }
        assert_eq!(ModeKey::NbaSpread.league(), League::Nba);
        assert_eq!(ModeKey::for_league(League::U2Pick), vec![ModeKey::U2Pick]);
    }

    #[test]
    fn test_check_guess() {
        let now = Utc::now();
        let mut w = new_wager().into_wager(Uuid::new_v4(), now);
        w.mode_config = serde_json::json!({"choices": ["Touchdown", "Field Goal"]});

        assert_eq!(w.check_guess(" touchdown ", now).unwrap(), "Touchdown");
        assert_eq!(w.check_guess(NO_ENTRY, now).unwrap(), NO_ENTRY);
        assert_eq!(w.check_guess("  ", now), Err(GuessError::Empty));
        assert!(matches!(
            w.check_guess("Safety", now),
            Err(GuessError::NotAChoice { .. })
        ));
        assert!(matches!(
            w.check_guess("Touchdown", w.close_time),
            Err(GuessError::WindowClosed { .. })
        ));

        w.status = BetStatus::Pending;
        assert!(matches!(
            w.check_guess("Touchdown", now),
            Err(GuessError::Locked { .. })
        ));
    }

    #[test]
    fn test_window_change_only_while_open() {
        let now = Utc::now();
        let w = new_wager().into_wager(Uuid::new_v4(), now);
        assert!(w.check_window_change(120, now).is_ok());
        assert!(w.check_window_change(0, now).is_err());
        assert!(w.check_window_change(120, w.close_time).is_err());
    }

    #[test]
    fn test_choices_from_config() {
        let mut w = new_wager().into_wager(Uuid::new_v4(), Utc::now());
        w.mode_config = serde_json::json!({"choices": ["TD", "FG"]});
        assert_eq!(w.choices(), vec!["TD".to_string(), "FG".to_string()]);
    }
}
