//! Mode validator runtime
//!
//! [`ModeValidator`] wraps any [`ModeRules`] with the plumbing every mode
//! shares: game-update and status-change subscriptions, baseline capture,
//! the per-(mode, game) signature gate and job submission. Validators only
//! enqueue jobs; the ledger is written by the job workers.

use super::rules::{Decision, ModeRules, WASH_INVALID_CONFIG};
use crate::domain::{
    AuditEventType, BetStatus, BetStatusChange, GameSnapshot, ModeKey, NewAuditEvent, NewJob,
    ResolutionOrigin, Wager,
};
use crate::error::Result;
use crate::persistence::{Baseline, BaselineStore, BetStore, GameSnapshotStore, JobQueue};
use crate::services::Metrics;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Shared handles every validator runs against
#[derive(Clone)]
pub struct ValidatorDeps {
    pub store: Arc<dyn BetStore>,
    pub queue: Arc<dyn JobQueue>,
    pub baselines: Arc<BaselineStore>,
    pub snapshots: Arc<GameSnapshotStore>,
    pub metrics: Arc<Metrics>,
    /// Full re-evaluation period, independent of the change feed
    pub resync_interval: Duration,
}

/// Object-safe face of a validator, used by the league kernel
#[async_trait]
pub trait Validator: Send + Sync {
    fn mode(&self) -> ModeKey;

    fn is_running(&self) -> bool;

    /// Capture the baseline for a pending wager if it has none yet
    async fn capture_baseline(&self, bet_id: Uuid) -> Result<Option<Baseline>>;

    /// Evaluate pending wagers on this game; returns how many were decided
    async fn on_game_update(&self, game: &GameSnapshot) -> Result<usize>;

    async fn on_status_change(&self, change: &BetStatusChange) -> Result<()>;

    /// Re-evaluate every pending wager of this mode, bypassing the gate
    async fn resync(&self) -> Result<usize>;

    fn start(
        self: Arc<Self>,
        updates: Option<broadcast::Receiver<Arc<GameSnapshot>>>,
    ) -> JoinHandle<()>;

    fn stop(&self);
}

pub struct ModeValidator<R: ModeRules> {
    rules: R,
    deps: ValidatorDeps,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl<R: ModeRules> ModeValidator<R> {
    pub fn new(rules: R, deps: ValidatorDeps) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            rules,
            deps,
            running: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    async fn current_game(&self, wager: &Wager) -> Result<Option<Arc<GameSnapshot>>> {
        let Some(game_id) = wager.league_game_id.as_deref() else {
            warn!(bet_id = %wager.id, mode = %wager.mode_key, "Wager has no game id");
            return Ok(None);
        };
        self.deps.snapshots.fetch(wager.league, game_id).await
    }

    async fn pending_wagers(&self) -> Result<Vec<Wager>> {
        self.deps
            .store
            .wagers_in_status(BetStatus::Pending, Some(self.rules.key()))
            .await
    }

    async fn save_baseline(
        &self,
        wager: &Wager,
        stats: &R::Stats,
        game: &GameSnapshot,
    ) -> Result<Baseline> {
        let baseline = Baseline {
            bet_id: wager.id,
            mode: self.rules.key(),
            game_id: game.game_id.clone(),
            captured_at: Utc::now(),
            stats: serde_json::to_value(stats)?,
        };
        self.deps.baselines.save(&baseline).await?;

        let event = NewAuditEvent::new(
            wager.id,
            AuditEventType::BaselineCaptured,
            serde_json::json!({
                "mode": self.rules.key(),
                "game_id": game.game_id,
                "game_status": game.status,
                "period": game.period,
                "stats": baseline.stats,
            }),
        );
        self.deps.queue.enqueue(NewJob::record_audit(event, None)?).await?;
        info!(bet_id = %wager.id, mode = %self.rules.key(), "Baseline captured");
        Ok(baseline)
    }

    async fn baseline_stats(&self, bet_id: Uuid) -> Result<Option<R::Stats>> {
        let Some(baseline) = self.deps.baselines.load(bet_id).await? else {
            return Ok(None);
        };
        match serde_json::from_value(baseline.stats) {
            Ok(stats) => Ok(Some(stats)),
            Err(e) => {
                warn!(bet_id = %bet_id, "Baseline does not match mode stats, recapturing: {}", e);
                self.deps.baselines.delete(bet_id).await?;
                Ok(None)
            }
        }
    }

    async fn capture_for(&self, wager: &Wager) -> Result<Option<Baseline>> {
        if let Some(existing) = self.deps.baselines.load(wager.id).await? {
            return Ok(Some(existing));
        }
        let Some(game) = self.current_game(wager).await? else {
            info!(bet_id = %wager.id, "No game data yet, baseline deferred");
            return Ok(None);
        };
        let config = match self.rules.parse_config(&wager.mode_config) {
            Ok(c) => c,
            Err(e) => {
                debug!(bet_id = %wager.id, "Baseline skipped: {}", e);
                return Ok(None);
            }
        };
        let Some(stats) = self.rules.extract(&config, &game) else {
            info!(bet_id = %wager.id, game_id = %game.game_id, "Game lacks mode stats, baseline deferred");
            return Ok(None);
        };
        self.save_baseline(wager, &stats, &game).await.map(Some)
    }

    /// Evaluate one pending wager against a snapshot and submit any decision
    #[instrument(skip_all, fields(bet_id = %wager.id, mode = %self.rules.key()))]
    pub async fn evaluate(&self, wager: &Wager, game: &GameSnapshot) -> Result<Decision> {
        let config = match self.rules.parse_config(&wager.mode_config) {
            Ok(c) => c,
            Err(e) => {
                warn!("Unreadable mode config, washing: {}", e);
                let decision = Decision::Wash(WASH_INVALID_CONFIG.to_string());
                self.submit(wager, &decision, serde_json::json!({ "error": e.to_string() }))
                    .await?;
                return Ok(decision);
            }
        };

        let Some(current) = self.rules.extract(&config, game) else {
            debug!(game_id = %game.game_id, "Game lacks mode stats");
            return Ok(Decision::Pending);
        };

        let Some(baseline) = self.baseline_stats(wager.id).await? else {
            // Late capture: this observation becomes the baseline
            warn!("Missing baseline, capturing now and deferring the decision");
            self.save_baseline(wager, &current, game).await?;
            return Ok(Decision::Pending);
        };

        let decision = self.rules.decide(&config, &baseline, &current, game);
        if decision != Decision::Pending {
            let detail = serde_json::json!({
                "baseline": baseline,
                "current": current,
                "game_id": game.game_id,
                "game_status": game.status,
                "period": game.period,
                "signature": game.signature,
            });
            self.submit(wager, &decision, detail).await?;
        }
        Ok(decision)
    }

    async fn submit(&self, wager: &Wager, decision: &Decision, detail: serde_json::Value) -> Result<()> {
        let mode = self.rules.key();
        let job = match decision {
            Decision::Pending => return Ok(()),
            Decision::Resolve(choice) => {
                NewJob::set_winning_choice(wager.id, choice, ResolutionOrigin::Validator { mode })?
            }
            Decision::Wash(reason) => NewJob::wash(wager.id, reason),
        };

        let event = NewAuditEvent::new(
            wager.id,
            AuditEventType::ModeResultComputed,
            serde_json::json!({
                "mode": mode,
                "result": decision,
                "detail": detail,
            }),
        );
        self.deps.queue.enqueue(NewJob::record_audit(event, None)?).await?;

        let outcome = self.deps.queue.enqueue(job).await?;
        if outcome.is_duplicate() {
            debug!(bet_id = %wager.id, "Decision already submitted");
        } else {
            self.deps.metrics.inc_validator_decisions();
            info!(bet_id = %wager.id, mode = %mode, "Decision submitted: {:?}", decision);
        }
        Ok(())
    }

    async fn evaluate_all(&self, wagers: &[Wager], game: &GameSnapshot) -> (usize, usize) {
        let mut decided = 0;
        let mut failed = 0;
        for wager in wagers {
            match self.evaluate(wager, game).await {
                Ok(Decision::Pending) => {}
                Ok(_) => decided += 1,
                Err(e) => {
                    failed += 1;
                    warn!(bet_id = %wager.id, "Evaluation failed: {}", e);
                }
            }
        }
        (decided, failed)
    }

    async fn handle_update(&self, game: &GameSnapshot) {
        if let Err(e) = Validator::on_game_update(self, game).await {
            warn!(mode = %self.rules.key(), game_id = %game.game_id, "Game update failed: {}", e);
        }
    }

    async fn handle_resync(&self, reason: &str) {
        match Validator::resync(self).await {
            Ok(decided) => debug!(mode = %self.rules.key(), decided, "Resync ({}) done", reason),
            Err(e) => warn!(mode = %self.rules.key(), "Resync ({}) failed: {}", reason, e),
        }
    }
}

async fn next_update(
    updates: &mut Option<broadcast::Receiver<Arc<GameSnapshot>>>,
) -> std::result::Result<Arc<GameSnapshot>, RecvError> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl<R: ModeRules> Validator for ModeValidator<R> {
    fn mode(&self) -> ModeKey {
        self.rules.key()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn capture_baseline(&self, bet_id: Uuid) -> Result<Option<Baseline>> {
        let Some(wager) = self.deps.store.wager(bet_id).await? else {
            return Ok(None);
        };
        if wager.status != BetStatus::Pending || wager.mode_key != self.rules.key() {
            return Ok(None);
        }
        self.capture_for(&wager).await
    }

    async fn on_game_update(&self, game: &GameSnapshot) -> Result<usize> {
        let mode = self.rules.key();
        if game.league != mode.league() {
            return Ok(0);
        }

        let signature = self.rules.game_signature(game);
        let last = self.deps.baselines.last_signature(mode, &game.game_id).await?;
        if last.as_deref() == Some(signature.as_str()) {
            debug!(mode = %mode, game_id = %game.game_id, "Signature unchanged, skipping");
            return Ok(0);
        }

        let wagers: Vec<Wager> = self
            .pending_wagers()
            .await?
            .into_iter()
            .filter(|w| w.league_game_id.as_deref() == Some(game.game_id.as_str()))
            .collect();

        let (decided, failed) = self.evaluate_all(&wagers, game).await;
        // Leave the gate open so the next update retries the failures
        if failed == 0 {
            self.deps
                .baselines
                .set_signature(mode, &game.game_id, &signature)
                .await?;
        }
        Ok(decided)
    }

    async fn on_status_change(&self, change: &BetStatusChange) -> Result<()> {
        if change.mode_key != self.rules.key() || change.status != BetStatus::Pending {
            return Ok(());
        }
        let Some(wager) = self.deps.store.wager(change.bet_id).await? else {
            return Ok(());
        };
        if wager.status != BetStatus::Pending {
            return Ok(());
        }

        if self.capture_for(&wager).await?.is_none() {
            return Ok(());
        }
        // The game may already be past the point that decides the wager
        if let Some(game) = self.current_game(&wager).await? {
            self.evaluate(&wager, &game).await?;
        }
        Ok(())
    }

    async fn resync(&self) -> Result<usize> {
        let mut decided = 0;
        for wager in self.pending_wagers().await? {
            let Some(game) = self.current_game(&wager).await? else {
                debug!(bet_id = %wager.id, "No game data for pending wager");
                continue;
            };
            match self.evaluate(&wager, &game).await {
                Ok(Decision::Pending) => {}
                Ok(_) => decided += 1,
                Err(e) => warn!(bet_id = %wager.id, "Resync evaluation failed: {}", e),
            }
        }
        Ok(decided)
    }

    fn start(
        self: Arc<Self>,
        updates: Option<broadcast::Receiver<Arc<GameSnapshot>>>,
    ) -> JoinHandle<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut status_rx = self.deps.store.subscribe_status();
        let mut updates = updates;
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mode = self.rules.key();
            info!(mode = %mode, "Validator started");
            self.handle_resync("startup").await;

            let mut resync = tokio::time::interval(self.deps.resync_interval);
            resync.tick().await;

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    update = next_update(&mut updates) => match update {
                        Ok(game) => self.handle_update(&game).await,
                        Err(RecvError::Lagged(n)) => {
                            warn!(mode = %mode, "Missed {} game updates", n);
                            self.handle_resync("updates lagged").await;
                        }
                        Err(RecvError::Closed) => {
                            warn!(mode = %mode, "Game update channel closed");
                            updates = None;
                        }
                    },
                    change = status_rx.recv() => match change {
                        Ok(change) => {
                            if let Err(e) = self.on_status_change(&change).await {
                                warn!(bet_id = %change.bet_id, "Status change handling failed: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(mode = %mode, "Missed {} status changes", n);
                            self.handle_resync("status feed lagged").await;
                        }
                        Err(RecvError::Closed) => {
                            warn!(mode = %mode, "Status feed closed");
                            status_rx = self.deps.store.subscribe_status();
                        }
                    },
                    _ = resync.tick() => self.handle_resync("periodic").await,
                }
            }

            self.running.store(false, Ordering::SeqCst);
            info!(mode = %mode, "Validator stopped");
        })
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryJobQueue, MemoryStore};
    use crate::domain::game::fixtures;
    use crate::domain::{BettingTable, JobKind, League, NewWager, ScoringKind};
    use crate::modes::next_score::{NextScore, FIELD_GOAL};
    use crate::modes::total_points::TotalPoints;
    use crate::persistence::MemoryCache;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryJobQueue>,
        deps: ValidatorDeps,
    }

    fn harness() -> Harness {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new(3));
        let deps = ValidatorDeps {
            store: store.clone(),
            queue: queue.clone(),
            baselines: Arc::new(BaselineStore::new(
                cache.clone(),
                Duration::from_secs(3600),
                Duration::from_secs(3600),
            )),
            snapshots: Arc::new(GameSnapshotStore::new(cache, Duration::from_secs(3600))),
            metrics: Arc::new(Metrics::new()),
            resync_interval: Duration::from_secs(60),
        };
        Harness { store, queue, deps }
    }

    /// A wager sitting in `pending` on game "g1"
    fn pending_wager(mode: ModeKey, config: serde_json::Value) -> Wager {
        let past = Utc::now() - ChronoDuration::seconds(120);
        let mut wager = NewWager {
            table_id: Uuid::new_v4(),
            proposer_id: Uuid::new_v4(),
            wager_amount: dec!(1.00),
            time_limit_seconds: 30,
            mode_key: mode,
            league_game_id: Some("g1".into()),
            description: "test".into(),
            mode_config: config,
        }
        .into_wager(Uuid::new_v4(), past);
        wager.status = BetStatus::Pending;
        wager
    }

    async fn seed(h: &Harness, wager: &Wager) {
        let table = BettingTable {
            id: wager.table_id,
            name: "table".into(),
            host_user_id: wager.proposer_id,
        };
        h.store.create_table(&table).await.unwrap();
        h.store.insert_wager(wager).await.unwrap();
    }

    #[tokio::test]
    async fn test_field_goal_after_baseline_submits_resolution() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflNextScore, serde_json::json!({}));
        seed(&h, &wager).await;

        let mut game = fixtures::snapshot(League::Nfl, "g1", 7, 0);
        fixtures::push_play(&mut game, ScoringKind::Touchdown, "1");
        h.deps.snapshots.put(game.clone()).await.unwrap();

        let validator = ModeValidator::new(NextScore, h.deps.clone());
        assert!(validator.capture_baseline(wager.id).await.unwrap().is_some());

        // Same snapshot: nothing new happened
        assert_eq!(validator.on_game_update(&game).await.unwrap(), 0);

        fixtures::push_play(&mut game, ScoringKind::FieldGoal, "2");
        assert_eq!(validator.on_game_update(&game).await.unwrap(), 1);

        let jobs = h.queue.jobs_for(wager.id).await;
        let resolve = jobs
            .iter()
            .find(|j| j.kind == JobKind::SetWinningChoice)
            .expect("resolution job");
        assert_eq!(resolve.payload["choice"], FIELD_GOAL);
        assert!(jobs
            .iter()
            .any(|j| j.idempotency_key.ends_with(":mode_result_computed")));
        assert!(jobs
            .iter()
            .any(|j| j.idempotency_key.ends_with(":baseline_captured")));
    }

    #[tokio::test]
    async fn test_signature_gate_skips_repeat_updates() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflTotalPoints, serde_json::json!({"line": 40.5}));
        seed(&h, &wager).await;

        let game = fixtures::snapshot(League::Nfl, "g1", 21, 14);
        h.deps.snapshots.put(game.clone()).await.unwrap();
        let validator = ModeValidator::new(TotalPoints::new(ModeKey::NflTotalPoints), h.deps.clone());
        validator.capture_baseline(wager.id).await.unwrap();

        assert_eq!(validator.on_game_update(&game).await.unwrap(), 0);
        let gate = h
            .deps
            .baselines
            .last_signature(ModeKey::NflTotalPoints, "g1")
            .await
            .unwrap();
        assert_eq!(gate, Some(validator.rules().game_signature(&game)));

        // A clock tick changes nothing the mode reads
        let mut ticked = game.clone();
        ticked.clock = "3:12".into();
        assert_eq!(validator.on_game_update(&ticked).await.unwrap(), 0);

        let mut final_game = game;
        final_game.status = crate::domain::GameStatus::Final;
        assert_eq!(validator.on_game_update(&final_game).await.unwrap(), 1);
    }

    /// Total points rules that count how often `decide` runs
    struct CountingRules {
        inner: TotalPoints,
        decisions: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ModeRules for CountingRules {
        type Config = <TotalPoints as ModeRules>::Config;
        type Stats = <TotalPoints as ModeRules>::Stats;

        fn key(&self) -> ModeKey {
            self.inner.key()
        }

        fn check(&self, config: &Self::Config) -> std::result::Result<(), String> {
            self.inner.check(config)
        }

        fn choices(&self, config: &Self::Config) -> Vec<String> {
            self.inner.choices(config)
        }

        fn extract(&self, config: &Self::Config, game: &GameSnapshot) -> Option<Self::Stats> {
            self.inner.extract(config, game)
        }

        fn decide(
            &self,
            config: &Self::Config,
            baseline: &Self::Stats,
            current: &Self::Stats,
            game: &GameSnapshot,
        ) -> Decision {
            self.decisions
                .fetch_add(1, Ordering::SeqCst);
            self.inner.decide(config, baseline, current, game)
        }

        fn game_signature(&self, game: &GameSnapshot) -> String {
            self.inner.game_signature(game)
        }
    }

    #[tokio::test]
    async fn test_identical_snapshot_is_decided_once() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflTotalPoints, serde_json::json!({"line": 40.5}));
        seed(&h, &wager).await;

        let game = fixtures::snapshot(League::Nfl, "g1", 21, 14);
        h.deps.snapshots.put(game.clone()).await.unwrap();
        let decisions = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let validator = ModeValidator::new(
            CountingRules {
                inner: TotalPoints::new(ModeKey::NflTotalPoints),
                decisions: decisions.clone(),
            },
            h.deps.clone(),
        );
        validator.capture_baseline(wager.id).await.unwrap();
        assert_eq!(decisions.load(Ordering::SeqCst), 0);

        validator.on_game_update(&game).await.unwrap();
        validator.on_game_update(&game).await.unwrap();
        assert_eq!(decisions.load(Ordering::SeqCst), 1);

        // New scores reopen the gate
        let scored = fixtures::snapshot(League::Nfl, "g1", 28, 14);
        validator.on_game_update(&scored).await.unwrap();
        assert_eq!(decisions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_baseline_is_captured_and_deferred() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflNextScore, serde_json::json!({}));
        seed(&h, &wager).await;

        let mut game = fixtures::snapshot(League::Nfl, "g1", 0, 0);
        fixtures::push_play(&mut game, ScoringKind::FieldGoal, "1");
        let validator = ModeValidator::new(NextScore, h.deps.clone());

        // The play predates the baseline, so it must not decide the wager
        assert_eq!(
            validator.evaluate(&wager, &game).await.unwrap(),
            Decision::Pending
        );
        assert!(h.deps.baselines.load(wager.id).await.unwrap().is_some());
        assert_eq!(
            validator.evaluate(&wager, &game).await.unwrap(),
            Decision::Pending
        );
    }

    #[tokio::test]
    async fn test_invalid_config_washes() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflTotalPoints, serde_json::json!({"line": "lots"}));
        seed(&h, &wager).await;
        let game = fixtures::snapshot(League::Nfl, "g1", 0, 0);
        let validator = ModeValidator::new(TotalPoints::new(ModeKey::NflTotalPoints), h.deps.clone());

        let decision = validator.evaluate(&wager, &game).await.unwrap();
        assert!(matches!(decision, Decision::Wash(_)));
        let jobs = h.queue.jobs_for(wager.id).await;
        assert!(jobs.iter().any(|j| j.kind == JobKind::Wash));
    }

    #[tokio::test]
    async fn test_status_change_resolves_already_final_game() {
        let h = harness();
        let wager = pending_wager(ModeKey::NflTotalPoints, serde_json::json!({"line": 30.5}));
        seed(&h, &wager).await;

        let mut game = fixtures::snapshot(League::Nfl, "g1", 24, 10);
        game.status = crate::domain::GameStatus::Final;
        h.deps.snapshots.put(game).await.unwrap();

        let validator = ModeValidator::new(TotalPoints::new(ModeKey::NflTotalPoints), h.deps.clone());
        validator
            .on_status_change(&BetStatusChange {
                bet_id: wager.id,
                status: BetStatus::Pending,
                mode_key: ModeKey::NflTotalPoints,
                league: League::Nfl,
            })
            .await
            .unwrap();

        let jobs = h.queue.jobs_for(wager.id).await;
        let resolve = jobs
            .iter()
            .find(|j| j.kind == JobKind::SetWinningChoice)
            .expect("resolution job");
        assert_eq!(resolve.payload["choice"], "Over");
    }
}
