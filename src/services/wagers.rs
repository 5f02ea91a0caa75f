//! Wager service
//!
//! Entry point for member-facing operations: proposing a wager, submitting
//! guesses, changing the acceptance window, host overrides and reading the
//! audit trail. Ledger transitions never happen here directly; they go
//! through the job queue.

use crate::domain::{
    AuditEvent, AuditEventType, EnqueueOutcome, NewAuditEvent, NewJob, NewWager, Participation,
    ResolutionOrigin, Wager,
};
use crate::error::{Result, WagerError};
use crate::modes::catalog;
use crate::persistence::{AuditLog, BetStore, JobQueue};
use crate::services::scheduler::LifecycleScheduler;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Key suffix shared by every manual override of a wager, so only the
/// first one is ever applied
pub const MANUAL_OVERRIDE_SUFFIX: &str = "manual";

pub struct WagerService {
    store: Arc<dyn BetStore>,
    audit: Arc<dyn AuditLog>,
    queue: Arc<dyn JobQueue>,
    scheduler: Arc<LifecycleScheduler>,
}

impl WagerService {
    pub fn new(
        store: Arc<dyn BetStore>,
        audit: Arc<dyn AuditLog>,
        queue: Arc<dyn JobQueue>,
        scheduler: Arc<LifecycleScheduler>,
    ) -> Self {
        Self {
            store,
            audit,
            queue,
            scheduler,
        }
    }

    /// Open a wager and register its close timer
    #[instrument(skip(self, request), fields(mode = %request.mode_key))]
    pub async fn create_bet(&self, request: NewWager, now: DateTime<Utc>) -> Result<Wager> {
        request.validate()?;
        if self.store.table(request.table_id).await?.is_none() {
            return Err(WagerError::Validation(format!(
                "table {} does not exist",
                request.table_id
            )));
        }

        let mode = request.mode_key;
        let choices = catalog::choices_for(mode, &request.mode_config)?;
        let mut wager = request.into_wager(Uuid::new_v4(), now);
        match wager.mode_config.as_object_mut() {
            Some(config) => {
                config.insert("choices".to_string(), serde_json::json!(choices));
            }
            None => {
                return Err(WagerError::InvalidModeConfig {
                    mode: mode.to_string(),
                    reason: "mode_config must be an object".to_string(),
                })
            }
        }

        self.store.insert_wager(&wager).await?;
        info!(
            bet_id = %wager.id,
            table_id = %wager.table_id,
            close_time = %wager.close_time,
            "Wager opened"
        );

        if let Err(e) = self.scheduler.register(wager.id, wager.close_time).await {
            // The overdue sweep closes it regardless
            warn!(bet_id = %wager.id, "Failed to register close timer: {}", e);
        }
        Ok(wager)
    }

    /// Record or change a member's guess while the window is open
    pub async fn submit_guess(
        &self,
        bet_id: Uuid,
        user_id: Uuid,
        guess: &str,
        now: DateTime<Utc>,
    ) -> Result<Participation> {
        let participation = self.store.upsert_guess(bet_id, user_id, guess, now).await?;
        info!(bet_id = %bet_id, user_id = %user_id, guess = %participation.guess, "Guess recorded");
        Ok(participation)
    }

    /// Change the acceptance window and move the close timer with it
    pub async fn update_window(
        &self,
        bet_id: Uuid,
        time_limit_seconds: i32,
        now: DateTime<Utc>,
    ) -> Result<Wager> {
        let wager = self
            .store
            .update_window(bet_id, time_limit_seconds, now)
            .await?;
        self.scheduler.reschedule(bet_id, wager.close_time).await?;
        info!(bet_id = %bet_id, close_time = %wager.close_time, "Acceptance window changed");
        Ok(wager)
    }

    /// Host or proposer settles a pending wager by hand.
    ///
    /// Competes with validator submissions through the queue; whichever
    /// settlement commits first wins and later ones are no-ops.
    #[instrument(skip(self))]
    pub async fn manual_override(
        &self,
        bet_id: Uuid,
        actor: Uuid,
        choice: &str,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        let wager = self
            .store
            .wager(bet_id)
            .await?
            .ok_or(WagerError::BetNotFound(bet_id))?;

        let table = self
            .store
            .table(wager.table_id)
            .await?
            .ok_or_else(|| WagerError::Internal(format!("table {} missing", wager.table_id)))?;
        if actor != table.host_user_id && actor != wager.proposer_id {
            return Err(WagerError::Unauthorized(format!(
                "user {} may not settle bet {}",
                actor, bet_id
            )));
        }

        if wager.status != crate::domain::BetStatus::Pending {
            return Err(WagerError::InvalidStateTransition {
                from: wager.status.to_string(),
                to: "manual override".to_string(),
            });
        }

        let choices = wager.choices();
        let choice = choice.trim();
        let canonical = if choices.is_empty() {
            choice.to_string()
        } else {
            choices
                .iter()
                .find(|c| c.trim().eq_ignore_ascii_case(choice))
                .cloned()
                .ok_or_else(|| {
                    WagerError::Validation(format!("'{}' is not one of {:?}", choice, choices))
                })?
        };
        if canonical.is_empty() {
            return Err(WagerError::Validation("choice must not be empty".to_string()));
        }

        self.audit
            .append(NewAuditEvent::new(
                bet_id,
                AuditEventType::ManualOverride,
                serde_json::json!({
                    "actor": actor,
                    "choice": canonical,
                    "requested_at": now,
                }),
            ))
            .await?;

        let job = NewJob::set_winning_choice(bet_id, &canonical, ResolutionOrigin::Manual { actor })?
            .with_key_suffix(MANUAL_OVERRIDE_SUFFIX);
        let outcome = self.queue.enqueue(job).await?;
        if outcome.is_duplicate() {
            info!(bet_id = %bet_id, "Manual override already queued");
        } else {
            info!(bet_id = %bet_id, actor = %actor, choice = %canonical, "Manual override queued");
        }
        Ok(outcome)
    }

    pub async fn wager(&self, bet_id: Uuid) -> Result<Wager> {
        self.store
            .wager(bet_id)
            .await?
            .ok_or(WagerError::BetNotFound(bet_id))
    }

    /// Audit events for a wager, oldest first
    pub async fn audit_trail(&self, bet_id: Uuid) -> Result<Vec<AuditEvent>> {
        if self.store.wager(bet_id).await?.is_none() {
            return Err(WagerError::BetNotFound(bet_id));
        }
        self.audit.trail(bet_id).await
    }
}
