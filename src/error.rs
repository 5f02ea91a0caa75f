use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the wager engine
#[derive(Error, Debug)]
pub enum WagerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Game data errors
    #[error("Invalid game data: {0}")]
    InvalidGameData(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    // Wager lifecycle errors
    #[error("Bet not found: {0}")]
    BetNotFound(Uuid),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Bet {bet_id} cannot close before {close_time}")]
    TooEarly {
        bet_id: Uuid,
        close_time: DateTime<Utc>,
    },

    #[error("Missing baseline for bet {0}")]
    MissingBaseline(Uuid),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Invalid mode config for {mode}: {reason}")]
    InvalidModeConfig { mode: String, reason: String },

    // Infrastructure errors
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authorization errors
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WagerError
pub type Result<T> = std::result::Result<T, WagerError>;

impl WagerError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Upstream and persistence hiccups are transient; integrity and
    /// validation failures are not and go straight to permanent failure.
    pub fn is_transient(&self) -> bool {
        match self {
            WagerError::Database(e) => !matches!(e, sqlx::Error::RowNotFound),
            WagerError::Http(_)
            | WagerError::UpstreamTimeout(_)
            | WagerError::UpstreamUnavailable(_)
            | WagerError::TooEarly { .. }
            | WagerError::MissingBaseline(_)
            | WagerError::Cache(_)
            | WagerError::Queue(_)
            | WagerError::Io(_) => true,
            _ => false,
        }
    }
}

/// Specific error types for guess submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuessError {
    #[error("Bet is {status}, guesses are locked")]
    Locked { status: String },

    #[error("Acceptance window closed at {close_time}")]
    WindowClosed { close_time: DateTime<Utc> },

    #[error("Guess must not be empty")]
    Empty,

    #[error("Guess '{guess}' is not one of {choices:?}")]
    NotAChoice { guess: String, choices: Vec<String> },
}

impl From<GuessError> for WagerError {
    fn from(err: GuessError) -> Self {
        WagerError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WagerError::UpstreamTimeout("espn".into()).is_transient());
        assert!(WagerError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!WagerError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!WagerError::BetNotFound(Uuid::nil()).is_transient());
        assert!(!WagerError::InvalidStateTransition {
            from: "active".into(),
            to: "resolved".into()
        }
        .is_transient());
    }

    #[test]
    fn test_guess_error_converts_to_validation() {
        let err: WagerError = GuessError::Empty.into();
        assert!(matches!(err, WagerError::Validation(_)));
    }
}
