//! In-memory store and job queue
//!
//! Same transition semantics as the Postgres adapters, with a single mutex
//! standing in for row locks. Used by `--memory` runs and the test suites.

use crate::domain::{
    AuditEvent, BalanceDelta, BalanceMovement, BetStatus, BetStatusChange, BettingTable,
    EnqueueOutcome, JobStatus, MemberBalance, ModeKey, NewAuditEvent, NewJob, Participation,
    ResolutionJob, ResolutionOrigin, Wager,
};
use crate::error::{Result, WagerError};
use crate::ledger::escrow::{self, ClosePlan, SettlePlan};
use crate::ledger::transitions;
use crate::persistence::{AuditLog, BetStore, JobQueue, QueueStats, TransitionOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

// ==================== Bet store ====================

#[derive(Default)]
struct StoreState {
    tables: HashMap<Uuid, BettingTable>,
    balances: HashMap<(Uuid, Uuid), MemberBalance>,
    wagers: HashMap<Uuid, Wager>,
    /// Keyed by user id so iteration matches the Postgres lock order
    participations: HashMap<Uuid, BTreeMap<Uuid, Participation>>,
    audit: Vec<AuditEvent>,
    audit_keys: HashSet<String>,
}

impl StoreState {
    fn wager(&self, bet_id: Uuid) -> Result<&Wager> {
        self.wagers
            .get(&bet_id)
            .ok_or(WagerError::BetNotFound(bet_id))
    }

    fn participations(&self, bet_id: Uuid) -> Vec<Participation> {
        self.participations
            .get(&bet_id)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    fn apply_delta(&mut self, table_id: Uuid, delta: &BalanceDelta) -> BalanceMovement {
        let entry = self
            .balances
            .entry((table_id, delta.user_id))
            .or_insert_with(|| MemberBalance::empty(table_id, delta.user_id));
        let before = *entry;
        *entry = before.applied(delta);
        BalanceMovement {
            user_id: delta.user_id,
            before,
            after: *entry,
        }
    }

    fn participation_mut(&mut self, bet_id: Uuid, user_id: Uuid) -> Option<&mut Participation> {
        self.participations
            .get_mut(&bet_id)
            .and_then(|p| p.get_mut(&user_id))
    }

    fn append(&mut self, event: NewAuditEvent, now: DateTime<Utc>) -> i64 {
        let id = self.audit.len() as i64 + 1;
        self.audit.push(AuditEvent {
            id,
            bet_id: event.bet_id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: now,
        });
        id
    }

    fn set_status(&mut self, bet_id: Uuid, status: BetStatus, now: DateTime<Utc>) -> Option<Wager> {
        let wager = self.wagers.get_mut(&bet_id)?;
        wager.status = status;
        if status.is_terminal() {
            wager.resolution_time = Some(now);
        }
        Some(wager.clone())
    }

    fn settle(
        &mut self,
        wager: &Wager,
        plan: &SettlePlan,
        origin: Option<&ResolutionOrigin>,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        let mut movements = Vec::with_capacity(plan.lines().len());
        for line in plan.lines() {
            movements.push(self.apply_delta(wager.table_id, &line.delta));
            if let Some(p) = self.participation_mut(wager.id, line.user_id) {
                p.payout = match plan {
                    SettlePlan::Payout { .. } => Some(line.payout.unwrap_or(Decimal::ZERO)),
                    SettlePlan::Wash { .. } => None,
                };
            }
        }

        let to = transitions::settle_target(plan);
        if let Some(w) = self.wagers.get_mut(&wager.id) {
            match plan {
                SettlePlan::Payout { choice, .. } => w.winning_choice = Some(choice.clone()),
                SettlePlan::Wash { reason, .. } => w.wash_reason = Some(reason.clone()),
            }
        }
        self.set_status(wager.id, to, now);

        for event in transitions::settle_events(wager.id, wager.status, plan, origin, &movements) {
            self.append(event, now);
        }

        TransitionOutcome::Applied {
            from: wager.status,
            to,
        }
    }
}

/// In-memory `BetStore` and `AuditLog`
pub struct MemoryStore {
    state: Mutex<StoreState>,
    status_tx: broadcast::Sender<BetStatusChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(StoreState::default()),
            status_tx,
        }
    }

    fn publish(&self, wager: &Wager) {
        let _ = self.status_tx.send(BetStatusChange {
            bet_id: wager.id,
            status: wager.status,
            mode_key: wager.mode_key,
            league: wager.league,
        });
    }

    fn publish_outcome(&self, wager: Option<Wager>, outcome: TransitionOutcome) {
        if let (Some(wager), true) = (wager, outcome.is_applied()) {
            self.publish(&wager);
        }
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn create_table(&self, table: &BettingTable) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tables.entry(table.id).or_insert_with(|| table.clone());
        Ok(())
    }

    async fn table(&self, table_id: Uuid) -> Result<Option<BettingTable>> {
        Ok(self.state.lock().await.tables.get(&table_id).cloned())
    }

    async fn deposit(
        &self,
        table_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<MemberBalance> {
        if amount <= Decimal::ZERO {
            return Err(WagerError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        let delta = BalanceDelta {
            available: amount,
            ..BalanceDelta::zero(user_id)
        };
        Ok(state.apply_delta(table_id, &delta).after)
    }

    async fn balance(&self, table_id: Uuid, user_id: Uuid) -> Result<MemberBalance> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&(table_id, user_id))
            .copied()
            .unwrap_or_else(|| MemberBalance::empty(table_id, user_id)))
    }

    async fn insert_wager(&self, wager: &Wager) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.tables.contains_key(&wager.table_id) {
                return Err(WagerError::Validation(format!(
                    "unknown table {}",
                    wager.table_id
                )));
            }
            if state.wagers.contains_key(&wager.id) {
                return Err(WagerError::Validation(format!(
                    "wager {} already exists",
                    wager.id
                )));
            }
            state.wagers.insert(wager.id, wager.clone());
        }
        self.publish(wager);
        Ok(())
    }

    async fn wager(&self, bet_id: Uuid) -> Result<Option<Wager>> {
        Ok(self.state.lock().await.wagers.get(&bet_id).cloned())
    }

    async fn upsert_guess(
        &self,
        bet_id: Uuid,
        user_id: Uuid,
        guess: &str,
        now: DateTime<Utc>,
    ) -> Result<Participation> {
        let mut state = self.state.lock().await;
        let guess = state.wager(bet_id)?.check_guess(guess, now)?;

        let entry = state
            .participations
            .entry(bet_id)
            .or_default()
            .entry(user_id)
            .or_insert_with(|| Participation::new(bet_id, user_id, &guess, now));
        entry.guess = guess;
        entry.submitted_at = now;
        Ok(entry.clone())
    }

    async fn update_window(
        &self,
        bet_id: Uuid,
        time_limit_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<Wager> {
        let mut state = self.state.lock().await;
        state.wager(bet_id)?.check_window_change(time_limit_seconds, now)?;

        let wager = state
            .wagers
            .get_mut(&bet_id)
            .ok_or(WagerError::BetNotFound(bet_id))?;
        wager.time_limit_seconds = time_limit_seconds;
        wager.close_time = Wager::close_time_for(wager.proposal_time, time_limit_seconds);
        Ok(wager.clone())
    }

    async fn participations(&self, bet_id: Uuid) -> Result<Vec<Participation>> {
        Ok(self.state.lock().await.participations(bet_id))
    }

    async fn overdue_active(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut due: Vec<&Wager> = state
            .wagers
            .values()
            .filter(|w| w.is_due_to_close(now))
            .collect();
        due.sort_by_key(|w| w.close_time);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|w| w.id)
            .collect())
    }

    async fn wagers_in_status(
        &self,
        status: BetStatus,
        mode: Option<ModeKey>,
    ) -> Result<Vec<Wager>> {
        let state = self.state.lock().await;
        let mut wagers: Vec<Wager> = state
            .wagers
            .values()
            .filter(|w| w.status == status && mode.map_or(true, |m| w.mode_key == m))
            .cloned()
            .collect();
        wagers.sort_by_key(|w| w.close_time);
        Ok(wagers)
    }

    async fn close_wager(&self, bet_id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let (outcome, updated) = {
            let mut state = self.state.lock().await;
            let wager = state.wager(bet_id)?.clone();
            if let Some(done) = transitions::guard_close(&wager, now)? {
                return Ok(done);
            }

            let participations = state.participations(bet_id);
            let plan = escrow::plan_close(&wager, &participations);
            let to = transitions::close_target(&plan);

            let mut movements = Vec::new();
            match &plan {
                ClosePlan::Escrow { lines, .. } => {
                    for line in lines {
                        movements.push(state.apply_delta(wager.table_id, &line.delta));
                        if let Some(p) = state.participation_mut(bet_id, line.user_id) {
                            p.escrow_amount = line.escrow_amount;
                            p.escrow_contingent = line.escrow_contingent;
                        }
                    }
                }
                ClosePlan::Wash { reason, .. } => {
                    if let Some(w) = state.wagers.get_mut(&bet_id) {
                        w.wash_reason = Some(reason.clone());
                    }
                }
            }
            let updated = state.set_status(bet_id, to, now);
            for event in transitions::close_events(bet_id, &plan, &movements) {
                state.append(event, now);
            }

            (
                TransitionOutcome::Applied {
                    from: BetStatus::Active,
                    to,
                },
                updated,
            )
        };

        self.publish_outcome(updated, outcome);
        Ok(outcome)
    }

    async fn resolve_wager(
        &self,
        bet_id: Uuid,
        choice: &str,
        origin: &ResolutionOrigin,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let (outcome, updated) = {
            let mut state = self.state.lock().await;
            let wager = state.wager(bet_id)?.clone();
            if let Some(done) = transitions::guard_resolve(&wager)? {
                return Ok(done);
            }

            let plan = escrow::plan_resolve(&state.participations(bet_id), choice);
            let outcome = state.settle(&wager, &plan, Some(origin), now);
            (outcome, state.wagers.get(&bet_id).cloned())
        };

        self.publish_outcome(updated, outcome);
        Ok(outcome)
    }

    async fn wash_wager(
        &self,
        bet_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let (outcome, updated) = {
            let mut state = self.state.lock().await;
            let wager = state.wager(bet_id)?.clone();
            if let Some(done) = transitions::guard_wash(&wager)? {
                return Ok(done);
            }

            let plan = escrow::plan_wash(&state.participations(bet_id), reason);
            let outcome = state.settle(&wager, &plan, None, now);
            (outcome, state.wagers.get(&bet_id).cloned())
        };

        self.publish_outcome(updated, outcome);
        Ok(outcome)
    }

    fn subscribe_status(&self) -> broadcast::Receiver<BetStatusChange> {
        self.status_tx.subscribe()
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn append(&self, event: NewAuditEvent) -> Result<i64> {
        Ok(self.state.lock().await.append(event, Utc::now()))
    }

    async fn append_once(&self, key: &str, event: NewAuditEvent) -> Result<Option<i64>> {
        let mut state = self.state.lock().await;
        if !state.audit_keys.insert(key.to_string()) {
            return Ok(None);
        }
        Ok(Some(state.append(event, Utc::now())))
    }

    async fn trail(&self, bet_id: Uuid) -> Result<Vec<AuditEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.bet_id == bet_id)
            .cloned()
            .collect())
    }
}

// ==================== Job queue ====================

struct QueuedJob {
    job: ResolutionJob,
    created_seq: u64,
    locked_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, QueuedJob>,
    by_key: HashMap<String, Uuid>,
    seq: u64,
}

/// In-memory `JobQueue`
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    default_max_attempts: u32,
}

impl MemoryJobQueue {
    pub fn new(default_max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            default_max_attempts,
        }
    }

    /// Jobs for a wager, oldest first
    pub async fn jobs_for(&self, bet_id: Uuid) -> Vec<ResolutionJob> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&QueuedJob> = state
            .jobs
            .values()
            .filter(|q| q.job.bet_id == bet_id)
            .collect();
        jobs.sort_by_key(|q| q.created_seq);
        jobs.into_iter().map(|q| q.job.clone()).collect()
    }

    fn update<F>(state: &mut QueueState, job_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut QueuedJob),
    {
        let queued = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| WagerError::Queue(format!("unknown job {}", job_id)))?;
        f(queued);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome> {
        let key = job.idempotency_key();
        let mut state = self.state.lock().await;
        if let Some(existing) = state.by_key.get(&key) {
            return Ok(EnqueueOutcome::Duplicate(*existing));
        }

        let id = Uuid::new_v4();
        state.seq += 1;
        let created_seq = state.seq;
        state.by_key.insert(key.clone(), id);
        state.jobs.insert(
            id,
            QueuedJob {
                job: ResolutionJob {
                    id,
                    kind: job.kind,
                    bet_id: job.bet_id,
                    payload: job.payload,
                    idempotency_key: key,
                    status: JobStatus::Queued,
                    attempts: 0,
                    max_attempts: job.max_attempts.unwrap_or(self.default_max_attempts),
                    run_at: job.run_at.unwrap_or_else(Utc::now),
                    last_error: None,
                },
                created_seq,
                locked_at: None,
            },
        );
        Ok(EnqueueOutcome::Enqueued(id))
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolutionJob>> {
        let mut state = self.state.lock().await;

        let mut busy: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|q| q.job.status == JobStatus::Running)
            .map(|q| q.job.bet_id)
            .collect();

        let mut due: Vec<(DateTime<Utc>, u64, Uuid, Uuid)> = state
            .jobs
            .values()
            .filter(|q| q.job.status == JobStatus::Queued && q.job.run_at <= now)
            .map(|q| (q.job.run_at, q.created_seq, q.job.id, q.job.bet_id))
            .collect();
        due.sort();

        let mut claimed = Vec::new();
        for (_, _, id, bet_id) in due {
            if claimed.len() >= limit {
                break;
            }
            if busy.contains(&bet_id) {
                continue;
            }
            busy.push(bet_id);
            if let Some(q) = state.jobs.get_mut(&id) {
                q.job.status = JobStatus::Running;
                q.job.attempts += 1;
                q.locked_at = Some(now);
                claimed.push(q.job.clone());
            }
        }

        if !claimed.is_empty() {
            debug!("{} claimed {} job(s)", worker_id, claimed.len());
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::update(&mut state, job_id, |q| {
            q.job.status = JobStatus::Completed;
            q.job.last_error = None;
            q.locked_at = None;
        })
    }

    async fn retry_later(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::update(&mut state, job_id, |q| {
            q.job.status = JobStatus::Queued;
            q.job.run_at = run_at;
            q.job.last_error = Some(error.to_string());
            q.locked_at = None;
        })
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::update(&mut state, job_id, |q| {
            q.job.status = JobStatus::Failed;
            q.job.last_error = Some(error.to_string());
            q.locked_at = None;
        })
    }

    async fn reschedule(&self, idempotency_key: &str, run_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(id) = state.by_key.get(idempotency_key).copied() else {
            return Ok(false);
        };
        match state.jobs.get_mut(&id) {
            Some(q) if q.job.status == JobStatus::Queued => {
                q.job.run_at = run_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_stale(&self, lease: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        let mut state = self.state.lock().await;
        let mut requeued = 0;
        for q in state.jobs.values_mut() {
            if q.job.status == JobStatus::Running && q.locked_at.is_some_and(|t| t < cutoff) {
                q.job.status = JobStatus::Queued;
                q.job.last_error = Some("lease expired".to_string());
                q.locked_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<ResolutionJob>> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map(|q| q.job.clone()))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for q in state.jobs.values() {
            match q.job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewWager, NO_ENTRY};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    async fn seeded() -> (MemoryStore, Wager, [Uuid; 3]) {
        let store = MemoryStore::new();
        let host = Uuid::new_v4();
        let table = BettingTable {
            id: Uuid::new_v4(),
            name: "sunday".into(),
            host_user_id: host,
        };
        store.create_table(&table).await.unwrap();

        let users = [host, Uuid::new_v4(), Uuid::new_v4()];
        for u in users {
            store.deposit(table.id, u, dec!(100)).await.unwrap();
        }

        let now = Utc::now() - ChronoDuration::seconds(120);
        let wager = NewWager {
            table_id: table.id,
            proposer_id: host,
            wager_amount: dec!(10),
            time_limit_seconds: 60,
            mode_key: ModeKey::U2Pick,
            league_game_id: None,
            description: "who wins".into(),
            mode_config: serde_json::json!({ "choices": ["A", "B"] }),
        }
        .into_wager(Uuid::new_v4(), now);
        store.insert_wager(&wager).await.unwrap();
        (store, wager, users)
    }

    #[tokio::test]
    async fn test_close_rejects_guess_after_window() {
        let (store, wager, users) = seeded().await;
        let err = store
            .upsert_guess(wager.id, users[0], "A", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_close_then_resolve_conserves_money() {
        let (store, wager, users) = seeded().await;
        let before_close = wager.proposal_time + ChronoDuration::seconds(1);
        store.upsert_guess(wager.id, users[0], "A", before_close).await.unwrap();
        store.upsert_guess(wager.id, users[1], "B", before_close).await.unwrap();
        store.upsert_guess(wager.id, users[2], NO_ENTRY, before_close).await.unwrap();

        let closed = store.close_wager(wager.id, Utc::now()).await.unwrap();
        assert_eq!(
            closed,
            TransitionOutcome::Applied {
                from: BetStatus::Active,
                to: BetStatus::Pending
            }
        );

        let origin = ResolutionOrigin::Manual { actor: users[0] };
        store.resolve_wager(wager.id, "a", &origin, Utc::now()).await.unwrap();

        let a = store.balance(wager.table_id, users[0]).await.unwrap();
        let b = store.balance(wager.table_id, users[1]).await.unwrap();
        let c = store.balance(wager.table_id, users[2]).await.unwrap();
        assert_eq!(a.available, dec!(110));
        assert_eq!(a.net, dec!(10));
        assert_eq!(b.available, dec!(90));
        assert_eq!(b.net, dec!(-10));
        assert_eq!(c.available, dec!(100));
        assert_eq!(a.contingent + b.contingent + c.contingent, dec!(0));

        // Second resolve is a no-op
        let again = store.resolve_wager(wager.id, "B", &origin, Utc::now()).await.unwrap();
        assert_eq!(
            again,
            TransitionOutcome::AlreadySettled {
                status: BetStatus::Resolved
            }
        );
        let a_after = store.balance(wager.table_id, users[0]).await.unwrap();
        assert_eq!(a_after, a);
    }

    #[tokio::test]
    async fn test_wash_requires_pending() {
        let (store, wager, users) = seeded().await;
        let before_close = wager.proposal_time + ChronoDuration::seconds(1);
        store.upsert_guess(wager.id, users[0], "A", before_close).await.unwrap();

        let err = store
            .wash_wager(wager.id, "cancelled", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WagerError::InvalidStateTransition { .. }));
        assert_eq!(store.wager(wager.id).await.unwrap().unwrap().status, BetStatus::Active);
        let balance = store.balance(wager.table_id, users[0]).await.unwrap();
        assert_eq!(balance.available, dec!(100));
        assert_eq!(balance.contingent, dec!(0));
    }

    #[tokio::test]
    async fn test_queue_is_idempotent_and_serializes_per_bet() {
        let queue = MemoryJobQueue::new(5);
        let bet = Uuid::new_v4();
        let now = Utc::now();

        let first = queue.enqueue(NewJob::close_bet(bet, now)).await.unwrap();
        let dup = queue.enqueue(NewJob::close_bet(bet, now)).await.unwrap();
        assert!(dup.is_duplicate());
        assert_eq!(first.job_id(), dup.job_id());

        queue.enqueue(NewJob::wash(bet, "test")).await.unwrap();
        let claimed = queue.claim("w1", 10, now + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // Same wager already running
        let none = queue.claim("w2", 10, now + ChronoDuration::seconds(1)).await.unwrap();
        assert!(none.is_empty());

        queue.complete(claimed[0].id).await.unwrap();
        let next = queue.claim("w2", 10, now + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(next.len(), 1);

        // Completed key still dedupes
        let late = queue.enqueue(NewJob::close_bet(bet, now)).await.unwrap();
        assert!(late.is_duplicate());
    }

    #[tokio::test]
    async fn test_requeue_stale_lease() {
        let queue = MemoryJobQueue::new(5);
        let now = Utc::now();
        queue.enqueue(NewJob::wash(Uuid::new_v4(), "x")).await.unwrap();
        let claimed = queue.claim("w1", 1, now).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let later = now + ChronoDuration::seconds(300);
        let requeued = queue
            .requeue_stale(Duration::from_secs(120), later)
            .await
            .unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(queue.stats().await.unwrap().queued, 1);
    }
}
