use crate::domain::{BetStatus, ResolutionOrigin};
use crate::error::Result;
use crate::persistence::{BaselineStore, BetStore, TransitionOutcome};
use crate::services::Metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Entry point for every ledger-mutating transition
///
/// The store runs each transition as one transaction; this wrapper adds
/// baseline cleanup, metrics and logging around it.
pub struct LedgerService {
    store: Arc<dyn BetStore>,
    baselines: Arc<BaselineStore>,
    metrics: Arc<Metrics>,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn BetStore>,
        baselines: Arc<BaselineStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            baselines,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn BetStore> {
        &self.store
    }

    #[instrument(skip(self))]
    pub async fn close(&self, bet_id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let outcome = self.store.close_wager(bet_id, now).await?;
        self.after_transition(bet_id, outcome).await;
        Ok(outcome)
    }

    #[instrument(skip(self, origin))]
    pub async fn resolve(
        &self,
        bet_id: Uuid,
        choice: &str,
        origin: &ResolutionOrigin,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let outcome = self.store.resolve_wager(bet_id, choice, origin, now).await?;
        self.after_transition(bet_id, outcome).await;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn wash(
        &self,
        bet_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let outcome = self.store.wash_wager(bet_id, reason, now).await?;
        self.after_transition(bet_id, outcome).await;
        Ok(outcome)
    }

    async fn after_transition(&self, bet_id: Uuid, outcome: TransitionOutcome) {
        let TransitionOutcome::Applied { from, to } = outcome else {
            info!(bet_id = %bet_id, status = %outcome.status(), "Transition skipped, already settled");
            return;
        };

        info!(bet_id = %bet_id, "Bet {} -> {}", from, to);
        match to {
            BetStatus::Pending => self.metrics.inc_bets_closed(),
            BetStatus::Resolved => self.metrics.inc_bets_resolved(),
            BetStatus::Washed => self.metrics.inc_bets_washed(),
            BetStatus::Active => {}
        }

        if to.is_terminal() {
            // The ledger is already committed; a stale baseline only costs cache space
            if let Err(e) = self.baselines.delete(bet_id).await {
                warn!(bet_id = %bet_id, "Failed to delete baseline: {}", e);
            }
        }
    }
}
