use super::transaction_manager::{TransactionManager, TransactionScope};
use crate::domain::{
    BalanceDelta, BalanceMovement, BetStatus, BetStatusChange, BettingTable, League,
    MemberBalance, ModeKey, NewAuditEvent, Participation, ResolutionOrigin, Wager,
};
use crate::error::{Result, WagerError};
use crate::ledger::escrow::{self, ClosePlan, SettlePlan};
use crate::ledger::transitions;
use crate::persistence::event_store::append_in;
use crate::persistence::{BetStore, TransitionOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Channel the status trigger notifies on
pub const STATUS_CHANNEL: &str = "bet_status_changed";

const WAGER_COLUMNS: &str = r#"
    id, table_id, proposer_id, wager_amount, time_limit_seconds, proposal_time,
    close_time, bet_status, winning_choice, resolution_time, wash_reason,
    mode_key, league, league_game_id, description, mode_config
"#;

const PARTICIPATION_COLUMNS: &str = r#"
    bet_id, user_id, guess, submitted_at, escrow_amount, escrow_contingent, payout
"#;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    tx: TransactionManager,
    status_tx: broadcast::Sender<BetStatusChange>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        let (status_tx, _) = broadcast::channel(1024);
        Self {
            tx: TransactionManager::new(pool.clone()),
            pool,
            status_tx,
        }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Re-broadcast `bet_status_changed` notifications to subscribers
    pub fn spawn_status_listener(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let status_tx = self.status_tx.clone();

        tokio::spawn(async move {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(l) => l,
                Err(e) => {
                    error!("Status listener could not connect: {}", e);
                    return;
                }
            };
            if let Err(e) = listener.listen(STATUS_CHANNEL).await {
                error!("Status listener could not LISTEN: {}", e);
                return;
            }
            info!("Listening for {} notifications", STATUS_CHANNEL);

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    msg = listener.recv() => match msg {
                        Ok(notification) => {
                            match serde_json::from_str::<BetStatusChange>(notification.payload()) {
                                Ok(change) => {
                                    let _ = status_tx.send(change);
                                }
                                Err(e) => warn!("Ignoring malformed status notification: {}", e),
                            }
                        }
                        Err(e) => {
                            // PgListener reconnects on the next recv; changes in the gap
                            // are picked up by the validators' periodic resync
                            warn!("Status listener connection lost: {}", e);
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    },
                }
            }
            debug!("Status listener stopped");
        })
    }
}

// ==================== Row mapping ====================

fn row_to_wager(r: &PgRow) -> Result<Wager> {
    let status: String = r.get("bet_status");
    let mode_key: String = r.get("mode_key");
    let league: String = r.get("league");
    Ok(Wager {
        id: r.get("id"),
        table_id: r.get("table_id"),
        proposer_id: r.get("proposer_id"),
        wager_amount: r.get("wager_amount"),
        time_limit_seconds: r.get("time_limit_seconds"),
        proposal_time: r.get("proposal_time"),
        close_time: r.get("close_time"),
        status: BetStatus::try_from(status.as_str()).map_err(WagerError::Internal)?,
        winning_choice: r.get("winning_choice"),
        resolution_time: r.get("resolution_time"),
        wash_reason: r.get("wash_reason"),
        mode_key: ModeKey::try_from(mode_key.as_str()).map_err(WagerError::UnknownMode)?,
        league: League::try_from(league.as_str()).map_err(WagerError::Internal)?,
        league_game_id: r.get("league_game_id"),
        description: r.get("description"),
        mode_config: r.get("mode_config"),
    })
}

fn row_to_participation(r: &PgRow) -> Participation {
    Participation {
        bet_id: r.get("bet_id"),
        user_id: r.get("user_id"),
        guess: r.get("guess"),
        submitted_at: r.get("submitted_at"),
        escrow_amount: r.get("escrow_amount"),
        escrow_contingent: r.get("escrow_contingent"),
        payout: r.get("payout"),
    }
}

fn row_to_balance(r: &PgRow) -> MemberBalance {
    MemberBalance {
        table_id: r.get("table_id"),
        user_id: r.get("user_id"),
        available: r.get("available"),
        net: r.get("net"),
        contingent: r.get("contingent"),
    }
}

// ==================== Transaction helpers ====================

async fn fetch_wager(conn: &mut PgConnection, bet_id: Uuid, for_update: bool) -> Result<Wager> {
    let sql = format!(
        "SELECT {} FROM bet_proposals WHERE id = $1{}",
        WAGER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(bet_id)
        .fetch_optional(conn)
        .await?
        .ok_or(WagerError::BetNotFound(bet_id))?;
    row_to_wager(&row)
}

async fn fetch_participations(
    conn: &mut PgConnection,
    bet_id: Uuid,
    for_update: bool,
) -> Result<Vec<Participation>> {
    let sql = format!(
        "SELECT {} FROM bet_participations WHERE bet_id = $1 ORDER BY user_id{}",
        PARTICIPATION_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let rows = sqlx::query(&sql).bind(bet_id).fetch_all(conn).await?;
    Ok(rows.iter().map(row_to_participation).collect())
}

/// Apply a delta to a member balance and return the before/after pair.
///
/// Callers apply deltas in user-id order so concurrent transitions on one
/// table always lock balance rows in the same order.
async fn apply_delta(
    conn: &mut PgConnection,
    table_id: Uuid,
    delta: &BalanceDelta,
) -> Result<BalanceMovement> {
    sqlx::query(
        r#"
        INSERT INTO member_balances (table_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (table_id, user_id) DO NOTHING
        "#,
    )
    .bind(table_id)
    .bind(delta.user_id)
    .execute(&mut *conn)
    .await?;

    let before = sqlx::query(
        r#"
        SELECT table_id, user_id, available, net, contingent
        FROM member_balances
        WHERE table_id = $1 AND user_id = $2
        FOR UPDATE
        "#,
    )
    .bind(table_id)
    .bind(delta.user_id)
    .fetch_one(&mut *conn)
    .await?;
    let before = row_to_balance(&before);

    let after = sqlx::query(
        r#"
        UPDATE member_balances SET
            available = available + $3,
            net = net + $4,
            contingent = contingent + $5,
            updated_at = NOW()
        WHERE table_id = $1 AND user_id = $2
        RETURNING table_id, user_id, available, net, contingent
        "#,
    )
    .bind(table_id)
    .bind(delta.user_id)
    .bind(delta.available)
    .bind(delta.net)
    .bind(delta.contingent)
    .fetch_one(&mut *conn)
    .await?;

    Ok(BalanceMovement {
        user_id: delta.user_id,
        before,
        after: row_to_balance(&after),
    })
}

async fn set_status(
    conn: &mut PgConnection,
    bet_id: Uuid,
    status: BetStatus,
    winning_choice: Option<&str>,
    wash_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let resolution_time = status.is_terminal().then_some(now);
    sqlx::query(
        r#"
        UPDATE bet_proposals SET
            bet_status = $2,
            winning_choice = COALESCE($3, winning_choice),
            wash_reason = COALESCE($4, wash_reason),
            resolution_time = COALESCE($5, resolution_time),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(bet_id)
    .bind(status.as_str())
    .bind(winning_choice)
    .bind(wash_reason)
    .bind(resolution_time)
    .execute(conn)
    .await?;
    Ok(())
}

async fn append_all(conn: &mut PgConnection, events: &[NewAuditEvent]) -> Result<()> {
    for event in events {
        append_in(&mut *conn, event).await?;
    }
    Ok(())
}

/// Apply a resolve or wash plan: balances, participation payouts, status, audit
async fn apply_settle(
    conn: &mut PgConnection,
    wager: &Wager,
    plan: &SettlePlan,
    origin: Option<&ResolutionOrigin>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let mut movements = Vec::with_capacity(plan.lines().len());
    for line in plan.lines() {
        movements.push(apply_delta(&mut *conn, wager.table_id, &line.delta).await?);
        sqlx::query(
            "UPDATE bet_participations SET payout = $3 WHERE bet_id = $1 AND user_id = $2",
        )
        .bind(wager.id)
        .bind(line.user_id)
        .bind(match plan {
            SettlePlan::Payout { .. } => Some(line.payout.unwrap_or(Decimal::ZERO)),
            SettlePlan::Wash { .. } => None,
        })
        .execute(&mut *conn)
        .await?;
    }

    let to = transitions::settle_target(plan);
    match plan {
        SettlePlan::Payout { choice, .. } => {
            set_status(&mut *conn, wager.id, to, Some(choice), None, now).await?
        }
        SettlePlan::Wash { reason, .. } => {
            set_status(&mut *conn, wager.id, to, None, Some(reason), now).await?
        }
    }

    let events = transitions::settle_events(wager.id, wager.status, plan, origin, &movements);
    append_all(&mut *conn, &events).await?;

    Ok(TransitionOutcome::Applied {
        from: wager.status,
        to,
    })
}

#[async_trait]
impl BetStore for PostgresStore {
    // ==================== Tables & balances ====================

    async fn create_table(&self, table: &BettingTable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO betting_tables (id, name, host_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(table.id)
        .bind(&table.name)
        .bind(table.host_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn table(&self, table_id: Uuid) -> Result<Option<BettingTable>> {
        let row = sqlx::query("SELECT id, name, host_user_id FROM betting_tables WHERE id = $1")
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| BettingTable {
            id: r.get("id"),
            name: r.get("name"),
            host_user_id: r.get("host_user_id"),
        }))
    }

    #[instrument(skip(self))]
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
        let mut tx = self.tx.begin(TransactionScope::Deposit).await?;
        let delta = BalanceDelta {
            available: amount,
            ..BalanceDelta::zero(user_id)
        };
        let movement = apply_delta(tx.executor()?, table_id, &delta).await?;
        tx.commit().await?;
        Ok(movement.after)
    }

    async fn balance(&self, table_id: Uuid, user_id: Uuid) -> Result<MemberBalance> {
        let row = sqlx::query(
            r#"
            SELECT table_id, user_id, available, net, contingent
            FROM member_balances
            WHERE table_id = $1 AND user_id = $2
            "#,
        )
        .bind(table_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| row_to_balance(&r))
            .unwrap_or_else(|| MemberBalance::empty(table_id, user_id)))
    }

    // ==================== Wagers ====================

    async fn insert_wager(&self, wager: &Wager) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bet_proposals (
                id, table_id, proposer_id, wager_amount, time_limit_seconds,
                proposal_time, close_time, bet_status, mode_key, league,
                league_game_id, description, mode_config
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(wager.id)
        .bind(wager.table_id)
        .bind(wager.proposer_id)
        .bind(wager.wager_amount)
        .bind(wager.time_limit_seconds)
        .bind(wager.proposal_time)
        .bind(wager.close_time)
        .bind(wager.status.as_str())
        .bind(wager.mode_key.as_str())
        .bind(wager.league.as_str())
        .bind(&wager.league_game_id)
        .bind(&wager.description)
        .bind(&wager.mode_config)
        .execute(&self.pool)
        .await?;

        debug!(bet_id = %wager.id, mode = %wager.mode_key, "Inserted wager");
        Ok(())
    }

    async fn wager(&self, bet_id: Uuid) -> Result<Option<Wager>> {
        let sql = format!("SELECT {} FROM bet_proposals WHERE id = $1", WAGER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_wager).transpose()
    }

    #[instrument(skip(self))]
    async fn upsert_guess(
        &self,
        bet_id: Uuid,
        user_id: Uuid,
        guess: &str,
        now: DateTime<Utc>,
    ) -> Result<Participation> {
        let mut tx = self.tx.begin(TransactionScope::GuessUpdate).await?;
        // Row lock orders this against the close transition
        let wager = fetch_wager(tx.executor()?, bet_id, true).await?;
        let guess = wager.check_guess(guess, now)?;

        let sql = format!(
            r#"
            INSERT INTO bet_participations (bet_id, user_id, guess, submitted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (bet_id, user_id) DO UPDATE SET
                guess = EXCLUDED.guess,
                submitted_at = EXCLUDED.submitted_at
            RETURNING {}
            "#,
            PARTICIPATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(bet_id)
            .bind(user_id)
            .bind(&guess)
            .bind(now)
            .fetch_one(tx.executor()?)
            .await?;

        tx.commit().await?;
        Ok(row_to_participation(&row))
    }

    #[instrument(skip(self))]
    async fn update_window(
        &self,
        bet_id: Uuid,
        time_limit_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<Wager> {
        let mut tx = self.tx.begin(TransactionScope::WindowUpdate).await?;
        let mut wager = fetch_wager(tx.executor()?, bet_id, true).await?;
        wager.check_window_change(time_limit_seconds, now)?;

        wager.time_limit_seconds = time_limit_seconds;
        wager.close_time = Wager::close_time_for(wager.proposal_time, time_limit_seconds);

        sqlx::query(
            r#"
            UPDATE bet_proposals SET
                time_limit_seconds = $2,
                close_time = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bet_id)
        .bind(time_limit_seconds)
        .bind(wager.close_time)
        .execute(tx.executor()?)
        .await?;

        tx.commit().await?;
        Ok(wager)
    }

    async fn participations(&self, bet_id: Uuid) -> Result<Vec<Participation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_participations(&mut conn, bet_id, false).await
    }

    async fn overdue_active(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM bet_proposals
            WHERE bet_status = 'active' AND close_time <= $1
            ORDER BY close_time ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<Uuid, _>("id")).collect())
    }

    async fn wagers_in_status(
        &self,
        status: BetStatus,
        mode: Option<ModeKey>,
    ) -> Result<Vec<Wager>> {
        let sql = format!(
            r#"
            SELECT {} FROM bet_proposals
            WHERE bet_status = $1 AND ($2::TEXT IS NULL OR mode_key = $2)
            ORDER BY close_time ASC
            "#,
            WAGER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(mode.map(|m| m.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_wager).collect()
    }

    // ==================== Lifecycle transitions ====================

    #[instrument(skip(self))]
    async fn close_wager(&self, bet_id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let mut tx = self.tx.begin(TransactionScope::CloseBet).await?;
        let wager = fetch_wager(tx.executor()?, bet_id, true).await?;
        if let Some(done) = transitions::guard_close(&wager, now)? {
            tx.rollback().await?;
            return Ok(done);
        }

        let participations = fetch_participations(tx.executor()?, bet_id, true).await?;
        let plan = escrow::plan_close(&wager, &participations);
        let to = transitions::close_target(&plan);

        let mut movements = Vec::new();
        match &plan {
            ClosePlan::Escrow { lines, .. } => {
                for line in lines {
                    movements.push(apply_delta(tx.executor()?, wager.table_id, &line.delta).await?);
                    sqlx::query(
                        r#"
                        UPDATE bet_participations SET
                            escrow_amount = $3,
                            escrow_contingent = $4
                        WHERE bet_id = $1 AND user_id = $2
                        "#,
                    )
                    .bind(bet_id)
                    .bind(line.user_id)
                    .bind(line.escrow_amount)
                    .bind(line.escrow_contingent)
                    .execute(tx.executor()?)
                    .await?;
                }
                set_status(tx.executor()?, bet_id, to, None, None, now).await?;
            }
            ClosePlan::Wash { reason, .. } => {
                set_status(tx.executor()?, bet_id, to, None, Some(reason), now).await?;
            }
        }

        let events = transitions::close_events(bet_id, &plan, &movements);
        append_all(tx.executor()?, &events).await?;
        tx.commit().await?;

        Ok(TransitionOutcome::Applied {
            from: BetStatus::Active,
            to,
        })
    }

    #[instrument(skip(self, origin))]
    async fn resolve_wager(
        &self,
        bet_id: Uuid,
        choice: &str,
        origin: &ResolutionOrigin,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.tx.begin(TransactionScope::ResolveBet).await?;
        let wager = fetch_wager(tx.executor()?, bet_id, true).await?;
        if let Some(done) = transitions::guard_resolve(&wager)? {
            tx.rollback().await?;
            return Ok(done);
        }

        let participations = fetch_participations(tx.executor()?, bet_id, true).await?;
        let plan = escrow::plan_resolve(&participations, choice);
        let outcome = apply_settle(tx.executor()?, &wager, &plan, Some(origin), now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn wash_wager(
        &self,
        bet_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.tx.begin(TransactionScope::WashBet).await?;
        let wager = fetch_wager(tx.executor()?, bet_id, true).await?;
        if let Some(done) = transitions::guard_wash(&wager)? {
            tx.rollback().await?;
            return Ok(done);
        }

        let participations = fetch_participations(tx.executor()?, bet_id, true).await?;
        let plan = escrow::plan_wash(&participations, reason);
        let outcome = apply_settle(tx.executor()?, &wager, &plan, None, now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    // ==================== Change feed ====================

    fn subscribe_status(&self) -> broadcast::Receiver<BetStatusChange> {
        self.status_tx.subscribe()
    }
}
