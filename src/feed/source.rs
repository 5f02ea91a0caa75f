use crate::domain::{GameSnapshot, League};
use crate::error::Result;
use async_trait::async_trait;

/// Upstream live-data source for one league
///
/// Implementations map their payloads into [`GameSnapshot`]s and leave
/// retries, timeouts and backoff to the feed provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn league(&self) -> League;

    /// Today's games with header-level data (status, period, teams, score)
    async fn scoreboard(&self) -> Result<Vec<GameSnapshot>>;

    /// Full detail for one game: scoring plays and player stat lines
    async fn game(&self, game_id: &str) -> Result<GameSnapshot>;
}
