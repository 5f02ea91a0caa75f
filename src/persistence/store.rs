//! Storage seams for the lifecycle engine
//!
//! Every ledger-mutating operation is a single store call so the
//! implementation can run it as one transaction with the wager row locked.

use crate::domain::{
    AuditEvent, BetStatus, BetStatusChange, BettingTable, MemberBalance, ModeKey, NewAuditEvent,
    Participation, ResolutionOrigin, Wager,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Result of a lifecycle transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The wager moved between these statuses
    Applied { from: BetStatus, to: BetStatus },
    /// The wager was already past this step; nothing changed
    AlreadySettled { status: BetStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    /// Status after the call
    pub fn status(&self) -> BetStatus {
        match self {
            TransitionOutcome::Applied { to, .. } => *to,
            TransitionOutcome::AlreadySettled { status } => *status,
        }
    }
}

#[async_trait]
pub trait BetStore: Send + Sync {
    // ==================== Tables & balances ====================

    async fn create_table(&self, table: &BettingTable) -> Result<()>;

    async fn table(&self, table_id: Uuid) -> Result<Option<BettingTable>>;

    /// Credit virtual currency to a member's available balance
    async fn deposit(&self, table_id: Uuid, user_id: Uuid, amount: Decimal)
        -> Result<MemberBalance>;

    async fn balance(&self, table_id: Uuid, user_id: Uuid) -> Result<MemberBalance>;

    // ==================== Wagers ====================

    async fn insert_wager(&self, wager: &Wager) -> Result<()>;

    async fn wager(&self, bet_id: Uuid) -> Result<Option<Wager>>;

    /// Create or change a member's guess; only while the window is open
    async fn upsert_guess(
        &self,
        bet_id: Uuid,
        user_id: Uuid,
        guess: &str,
        now: DateTime<Utc>,
    ) -> Result<Participation>;

    /// Change the acceptance window and recompute the close time; only while open
    async fn update_window(
        &self,
        bet_id: Uuid,
        time_limit_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<Wager>;

    async fn participations(&self, bet_id: Uuid) -> Result<Vec<Participation>>;

    /// Active wagers whose close time has passed
    async fn overdue_active(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>>;

    async fn wagers_in_status(
        &self,
        status: BetStatus,
        mode: Option<ModeKey>,
    ) -> Result<Vec<Wager>>;

    // ==================== Lifecycle transitions ====================

    /// active -> pending, or active -> washed when uncontested
    async fn close_wager(&self, bet_id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome>;

    /// pending -> resolved, or pending -> washed when nobody picked `choice`
    async fn resolve_wager(
        &self,
        bet_id: Uuid,
        choice: &str,
        origin: &ResolutionOrigin,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    /// pending -> washed with full refunds; active wagers are rejected
    async fn wash_wager(
        &self,
        bet_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    // ==================== Change feed ====================

    /// Committed status changes
    fn subscribe_status(&self) -> broadcast::Receiver<BetStatusChange>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, event: NewAuditEvent) -> Result<i64>;

    /// Append unless an event was already recorded under `key`; `None` when
    /// the key was seen before
    async fn append_once(&self, key: &str, event: NewAuditEvent) -> Result<Option<i64>>;

    /// All events for a wager, oldest first
    async fn trail(&self, bet_id: Uuid) -> Result<Vec<AuditEvent>>;
}
