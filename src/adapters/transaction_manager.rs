//! Transaction Manager for atomic ledger updates
//!
//! Every lifecycle transition spans several tables (wager row, participations,
//! member balances, resolution history). They run inside one managed
//! transaction with the wager row locked first.

use crate::error::{Result, WagerError};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument, warn};

/// Transaction scope identifier for tracking and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionScope {
    /// active -> pending|washed
    CloseBet,
    /// pending -> resolved|washed
    ResolveBet,
    /// active|pending -> washed
    WashBet,
    /// Guess insert or change
    GuessUpdate,
    /// Acceptance window change
    WindowUpdate,
    /// Balance credit
    Deposit,
}

impl std::fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CloseBet => write!(f, "close_bet"),
            Self::ResolveBet => write!(f, "resolve_bet"),
            Self::WashBet => write!(f, "wash_bet"),
            Self::GuessUpdate => write!(f, "guess_update"),
            Self::WindowUpdate => write!(f, "window_update"),
            Self::Deposit => write!(f, "deposit"),
        }
    }
}

/// Transaction Manager for atomic database operations
#[derive(Clone)]
pub struct TransactionManager {
    pool: PgPool,
}

impl TransactionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Begin a new transaction with scope tracking
    #[instrument(skip(self))]
    pub async fn begin(&self, scope: TransactionScope) -> Result<ManagedTransaction<'static>> {
        let tx = self.pool.begin().await?;
        debug!("Started transaction for scope: {}", scope);
        Ok(ManagedTransaction {
            tx: Some(tx),
            scope,
            committed: false,
        })
    }
}

/// A managed transaction with automatic rollback on drop
pub struct ManagedTransaction<'a> {
    tx: Option<Transaction<'a, Postgres>>,
    scope: TransactionScope,
    committed: bool,
}

impl<'a> ManagedTransaction<'a> {
    /// Connection for executing queries inside the transaction.
    /// Use as: `.execute(tx.executor()?).await`
    pub fn executor(&mut self) -> Result<&mut sqlx::PgConnection> {
        let scope = self.scope;
        let tx = self.tx.as_mut().ok_or_else(|| {
            WagerError::Internal(format!("transaction for scope {} already finished", scope))
        })?;
        Ok(&mut **tx)
    }

    pub fn scope(&self) -> TransactionScope {
        self.scope
    }

    pub async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            self.committed = true;
            debug!("Committed transaction for scope: {}", self.scope);
        }
        Ok(())
    }

    /// Rollback the transaction explicitly
    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            debug!("Rolled back transaction for scope: {}", self.scope);
        }
        Ok(())
    }
}

impl<'a> Drop for ManagedTransaction<'a> {
    fn drop(&mut self) {
        if self.tx.is_some() && !self.committed {
            // sqlx rolls back on drop
            warn!(
                "Transaction for scope {} was dropped without commit - rolling back",
                self.scope
            );
        }
    }
}
