//! Game Feed Provider
//!
//! One poller per league. Each tick reads the scoreboard, fetches detail for
//! games in progress (and once more for a game that just went final), and
//! publishes a snapshot only when its content signature changed.
//!
//! Upstream calls go through a circuit breaker and a hard timeout. The delay
//! between ticks grows as `base * min(2^failures, max_multiplier)` while the
//! upstream is failing and resets on the first success.

use super::source::GameSource;
use crate::config::{BreakerConfig, FeedConfig};
use crate::coordination::FeedCircuitBreaker;
use crate::domain::{GameSnapshot, GameStatus, League};
use crate::error::{Result, WagerError};
use crate::persistence::GameSnapshotStore;
use crate::services::Metrics;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Outcome of one poll tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub scoreboard_games: usize,
    pub details_fetched: usize,
    pub published: usize,
    pub detail_failures: usize,
    pub publish_failures: usize,
}

pub struct GameFeedProvider {
    league: League,
    source: Arc<dyn GameSource>,
    config: FeedConfig,
    breaker: FeedCircuitBreaker,
    snapshots: Arc<GameSnapshotStore>,
    metrics: Arc<Metrics>,
    updates: broadcast::Sender<Arc<GameSnapshot>>,
    consecutive_failures: AtomicU32,
    /// Games whose final detail fetch has been published
    finalized: DashMap<String, ()>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl GameFeedProvider {
    pub fn new(
        source: Arc<dyn GameSource>,
        config: FeedConfig,
        breaker: BreakerConfig,
        snapshots: Arc<GameSnapshotStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let league = source.league();
        let (updates, _) = broadcast::channel(256);
        let (stop_tx, _) = watch::channel(false);
        Self {
            league,
            breaker: FeedCircuitBreaker::new(source.name(), breaker),
            source,
            config,
            snapshots,
            metrics,
            updates,
            consecutive_failures: AtomicU32::new(0),
            finalized: DashMap::new(),
            running: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn league(&self) -> League {
        self.league
    }

    pub fn breaker(&self) -> &FeedCircuitBreaker {
        &self.breaker
    }

    pub fn snapshots(&self) -> &Arc<GameSnapshotStore> {
        &self.snapshots
    }

    /// Receive every published (changed) snapshot
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GameSnapshot>> {
        self.updates.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Sleep before the next tick, without jitter
    pub fn backoff_delay(&self) -> Duration {
        let failures = self.consecutive_failures();
        let multiplier = 2u32
            .saturating_pow(failures)
            .min(self.config.max_backoff_multiplier.max(1));
        self.config.base_interval() * multiplier
    }

    /// Backoff delay with the configured +/- jitter applied
    pub fn next_delay(&self) -> Duration {
        let delay = self.backoff_delay();
        let pct = f64::from(self.config.jitter_pct.min(100)) / 100.0;
        if pct == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - pct)..=(1.0 + pct));
        delay.mul_f64(factor)
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(WagerError::UpstreamTimeout(format!(
                "{} {} after {:?}",
                self.source.name(),
                what,
                self.config.timeout()
            ))),
        }
    }

    async fn publish(&self, snapshot: GameSnapshot) -> Result<bool> {
        let league = snapshot.league;
        let game_id = snapshot.game_id.clone();
        if !self.snapshots.put(snapshot).await? {
            return Ok(false);
        }
        if let Some(stored) = self.snapshots.get(league, &game_id) {
            self.metrics.inc_games_published();
            let _ = self.updates.send(stored);
        }
        Ok(true)
    }

    /// Publish and tally; a storage failure is logged and leaves the game
    /// to be retried next tick. Returns whether the snapshot is stored.
    async fn publish_counted(&self, snapshot: GameSnapshot, summary: &mut PollSummary) -> bool {
        let game_id = snapshot.game_id.clone();
        match self.publish(snapshot).await {
            Ok(changed) => {
                if changed {
                    summary.published += 1;
                }
                true
            }
            Err(e) => {
                warn!(game_id = %game_id, "Snapshot publish failed: {}", e);
                summary.publish_failures += 1;
                false
            }
        }
    }

    /// Games held back from refetching because their final state is stored
    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }

    /// Whether a scoreboard entry needs a detail fetch this tick
    fn wants_detail(&self, game: &GameSnapshot) -> bool {
        match game.status {
            GameStatus::InProgress | GameStatus::Halftime => true,
            GameStatus::Final => !self.finalized.contains_key(&game.game_id),
            GameStatus::Scheduled | GameStatus::Unknown => false,
        }
    }

    /// Run one poll tick
    #[instrument(skip(self), fields(league = %self.league))]
    pub async fn poll_once(&self) -> Result<PollSummary> {
        if !self.breaker.should_allow().await {
            return Err(WagerError::UpstreamUnavailable(format!(
                "{} circuit open, next trial in {}s",
                self.source.name(),
                self.breaker.time_until_trial().await
            )));
        }
        self.metrics.inc_feed_polls();

        let board = match self.call("scoreboard", self.source.scoreboard()).await {
            Ok(board) => board,
            Err(e) => {
                self.on_failure(&e).await;
                return Err(e);
            }
        };

        let mut summary = PollSummary {
            scoreboard_games: board.len(),
            ..PollSummary::default()
        };
        let mut last_error = None;
        let on_board: HashSet<String> = board.iter().map(|g| g.game_id.clone()).collect();

        for entry in board {
            if !self.wants_detail(&entry) {
                if entry.status == GameStatus::Scheduled {
                    self.publish_counted(entry, &mut summary).await;
                }
                continue;
            }

            let game_id = entry.game_id.clone();
            match self.call("game detail", self.source.game(&game_id)).await {
                Ok(detail) => {
                    summary.details_fetched += 1;
                    let is_final = detail.is_final();
                    // A final game is refetched until its snapshot is stored
                    if self.publish_counted(detail, &mut summary).await && is_final {
                        self.finalized.insert(game_id, ());
                    }
                }
                Err(e) => {
                    warn!(game_id = %game_id, "Detail fetch failed: {}", e);
                    summary.detail_failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Games that left the scoreboard cannot be refetched
        self.finalized.retain(|id, _| on_board.contains(id));

        match last_error {
            Some(e) if summary.details_fetched == 0 => self.on_failure(&e).await,
            _ => self.on_success().await,
        }

        debug!(?summary, "Poll tick finished");
        Ok(summary)
    }

    async fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.breaker.record_success().await;
    }

    async fn on_failure(&self, err: &WagerError) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        self.metrics.inc_feed_failures();
        self.breaker.record_failure(&err.to_string()).await;
    }

    /// Spawn the poll loop
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!(league = %this.league, source = this.source.name(), "Feed provider started");
            while this.running.load(Ordering::SeqCst) {
                if let Err(e) = this.poll_once().await {
                    warn!(league = %this.league, "Poll failed: {}", e);
                }

                let delay = this.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            info!(league = %this.league, "Feed provider stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures;
    use crate::feed::source::MockGameSource;
    use crate::persistence::MemoryCache;

    fn feed_config() -> FeedConfig {
        FeedConfig {
            base_interval_secs: 30,
            max_backoff_multiplier: 8,
            timeout_secs: 5,
            jitter_pct: 0,
            ..FeedConfig::nfl_defaults()
        }
    }

    fn provider(source: MockGameSource, threshold: u32) -> GameFeedProvider {
        let snapshots = Arc::new(GameSnapshotStore::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        ));
        GameFeedProvider::new(
            Arc::new(source),
            feed_config(),
            BreakerConfig {
                failure_threshold: threshold,
                cooldown_secs: 60,
            },
            snapshots,
            Arc::new(Metrics::new()),
        )
    }

    fn mock_source() -> MockGameSource {
        let mut source = MockGameSource::new();
        source.expect_name().return_const("mock");
        source.expect_league().return_const(League::Nfl);
        source
    }

    fn live(game_id: &str, home: i32) -> GameSnapshot {
        let mut g = fixtures::snapshot(League::Nfl, game_id, home, 0);
        g.status = GameStatus::InProgress;
        g.sealed()
    }

    #[tokio::test]
    async fn test_publishes_only_on_signature_change() {
        let mut source = mock_source();
        source
            .expect_scoreboard()
            .returning(|| Ok(vec![live("g1", 0)]));
        source.expect_game().returning(|_| Ok(live("g1", 7)));

        let provider = provider(source, 5);
        let mut rx = provider.subscribe();

        let first = provider.poll_once().await.unwrap();
        assert_eq!(first.published, 1);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.home.score, 7);

        // Same content: nothing published
        let second = provider.poll_once().await.unwrap();
        assert_eq!(second.details_fetched, 1);
        assert_eq!(second.published, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_final_game_fetched_once() {
        let mut source = mock_source();
        source.expect_scoreboard().returning(|| {
            let mut g = fixtures::snapshot(League::Nfl, "g1", 21, 17);
            g.status = GameStatus::Final;
            Ok(vec![g.sealed()])
        });
        source.expect_game().times(1).returning(|_| {
            let mut g = fixtures::snapshot(League::Nfl, "g1", 21, 17);
            g.status = GameStatus::Final;
            Ok(g.sealed())
        });

        let provider = provider(source, 5);
        provider.poll_once().await.unwrap();
        let again = provider.poll_once().await.unwrap();
        assert_eq!(again.details_fetched, 0);
    }

    #[tokio::test]
    async fn test_backoff_grows_and_resets() {
        let mut source = mock_source();
        let mut calls = 0;
        source.expect_scoreboard().returning(move || {
            calls += 1;
            if calls <= 4 {
                Err(WagerError::UpstreamUnavailable("503".into()))
            } else {
                Ok(vec![])
            }
        });

        let provider = provider(source, 10);
        assert_eq!(provider.backoff_delay(), Duration::from_secs(30));

        provider.poll_once().await.unwrap_err();
        assert_eq!(provider.backoff_delay(), Duration::from_secs(60));
        provider.poll_once().await.unwrap_err();
        assert_eq!(provider.backoff_delay(), Duration::from_secs(120));
        provider.poll_once().await.unwrap_err();
        provider.poll_once().await.unwrap_err();
        // Capped at the max multiplier
        assert_eq!(provider.backoff_delay(), Duration::from_secs(240));

        provider.poll_once().await.unwrap();
        assert_eq!(provider.backoff_delay(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let mut source = mock_source();
        source
            .expect_scoreboard()
            .times(2)
            .returning(|| Err(WagerError::UpstreamUnavailable("down".into())));

        let provider = provider(source, 2);
        provider.poll_once().await.unwrap_err();
        provider.poll_once().await.unwrap_err();

        // Third tick is rejected without calling upstream
        let err = provider.poll_once().await.unwrap_err();
        assert!(matches!(err, WagerError::UpstreamUnavailable(_)));
        assert_eq!(
            provider.breaker().state().await,
            crate::coordination::CircuitState::Open
        );
    }

    /// Durable cache that rejects every write
    struct ReadOnlyCache;

    #[async_trait::async_trait]
    impl crate::persistence::DurableCache for ReadOnlyCache {
        async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Option<Duration>) -> Result<()> {
            Err(WagerError::Cache("read-only".into()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn purge_expired(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_publish_failure_still_closes_trial() {
        let mut source = mock_source();
        let mut calls = 0;
        source.expect_scoreboard().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(WagerError::UpstreamUnavailable("503".into()))
            } else {
                Ok(vec![live("g1", 7)])
            }
        });
        source.expect_game().returning(|_| Ok(live("g1", 7)));

        let provider = GameFeedProvider::new(
            Arc::new(source),
            feed_config(),
            BreakerConfig {
                failure_threshold: 1,
                cooldown_secs: 0,
            },
            Arc::new(GameSnapshotStore::new(Arc::new(ReadOnlyCache), Duration::from_secs(60))),
            Arc::new(Metrics::new()),
        );

        provider.poll_once().await.unwrap_err();
        assert_eq!(
            provider.breaker().state().await,
            crate::coordination::CircuitState::Open
        );

        // The trial reaches upstream fine; only storage fails
        let summary = provider.poll_once().await.unwrap();
        assert_eq!(summary.details_fetched, 1);
        assert_eq!(summary.publish_failures, 1);
        assert_eq!(summary.published, 0);
        assert_eq!(
            provider.breaker().state().await,
            crate::coordination::CircuitState::Closed
        );
        assert_eq!(provider.consecutive_failures(), 0);

        // Nothing was stored, so the next tick tries again
        let again = provider.poll_once().await.unwrap();
        assert_eq!(again.publish_failures, 1);
    }

    #[tokio::test]
    async fn test_finalized_games_pruned_when_off_scoreboard() {
        let mut source = mock_source();
        let mut ticks = 0;
        source.expect_scoreboard().returning(move || {
            ticks += 1;
            if ticks > 2 {
                return Ok(vec![live("g3", 0)]);
            }
            let mut g = fixtures::snapshot(League::Nfl, "g1", 21, 17);
            g.status = GameStatus::Final;
            let mut h = fixtures::snapshot(League::Nfl, "g2", 10, 3);
            h.status = GameStatus::Final;
            Ok(vec![g.sealed(), h.sealed()])
        });
        source.expect_game().returning(|id| {
            let mut g = fixtures::snapshot(League::Nfl, id, 21, 17);
            g.status = if id == "g3" {
                GameStatus::InProgress
            } else {
                GameStatus::Final
            };
            Ok(g.sealed())
        });

        let provider = provider(source, 5);
        provider.poll_once().await.unwrap();
        assert_eq!(provider.finalized_count(), 2);
        provider.poll_once().await.unwrap();
        assert_eq!(provider.finalized_count(), 2);

        // Yesterday's finals drop off the board
        provider.poll_once().await.unwrap();
        assert_eq!(provider.finalized_count(), 0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut source = mock_source();
        source.expect_scoreboard().never();
        let mut config = feed_config();
        config.jitter_pct = 10;
        let provider = GameFeedProvider::new(
            Arc::new(source),
            config,
            BreakerConfig::default(),
            Arc::new(GameSnapshotStore::new(
                Arc::new(MemoryCache::new()),
                Duration::from_secs(60),
            )),
            Arc::new(Metrics::new()),
        );
        for _ in 0..50 {
            let d = provider.next_delay();
            assert!(d >= Duration::from_millis(26_900) && d <= Duration::from_millis(33_100));
        }
    }
}
