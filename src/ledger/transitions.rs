//! Status guards and audit payloads shared by every store implementation

use super::escrow::{ClosePlan, SettlePlan};
use crate::domain::{
    AuditEventType, BalanceMovement, BetStatus, NewAuditEvent, ResolutionOrigin, Wager,
};
use crate::error::{Result, WagerError};
use crate::persistence::TransitionOutcome;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

/// `Ok(None)` means proceed; `Ok(Some(_))` means the wager is already past this step
pub type Guard = Result<Option<TransitionOutcome>>;

pub fn guard_close(wager: &Wager, now: DateTime<Utc>) -> Guard {
    match wager.status {
        BetStatus::Active if now < wager.close_time => Err(WagerError::TooEarly {
            bet_id: wager.id,
            close_time: wager.close_time,
        }),
        BetStatus::Active => Ok(None),
        status => Ok(Some(TransitionOutcome::AlreadySettled { status })),
    }
}

pub fn guard_resolve(wager: &Wager) -> Guard {
    match wager.status {
        BetStatus::Active => Err(WagerError::InvalidStateTransition {
            from: BetStatus::Active.to_string(),
            to: BetStatus::Resolved.to_string(),
        }),
        BetStatus::Pending => Ok(None),
        status => Ok(Some(TransitionOutcome::AlreadySettled { status })),
    }
}

/// Active wagers hold no escrow; an uncontested one is washed by its close
pub fn guard_wash(wager: &Wager) -> Guard {
    match wager.status {
        BetStatus::Active => Err(WagerError::InvalidStateTransition {
            from: BetStatus::Active.to_string(),
            to: BetStatus::Washed.to_string(),
        }),
        BetStatus::Pending => Ok(None),
        status => Ok(Some(TransitionOutcome::AlreadySettled { status })),
    }
}

/// Status the wager ends up in after a close plan
pub fn close_target(plan: &ClosePlan) -> BetStatus {
    match plan {
        ClosePlan::Escrow { .. } => BetStatus::Pending,
        ClosePlan::Wash { .. } => BetStatus::Washed,
    }
}

pub fn settle_target(plan: &SettlePlan) -> BetStatus {
    match plan {
        SettlePlan::Payout { .. } => BetStatus::Resolved,
        SettlePlan::Wash { .. } => BetStatus::Washed,
    }
}

pub fn status_transition_event(
    bet_id: Uuid,
    from: BetStatus,
    to: BetStatus,
    detail: serde_json::Value,
) -> NewAuditEvent {
    NewAuditEvent::new(
        bet_id,
        AuditEventType::StatusTransition,
        json!({
            "from": from,
            "to": to,
            "detail": detail,
        }),
    )
}

/// Audit events for a close, in append order
pub fn close_events(
    bet_id: Uuid,
    plan: &ClosePlan,
    movements: &[BalanceMovement],
) -> Vec<NewAuditEvent> {
    let detail = match plan {
        ClosePlan::Escrow { pot, lines } => json!({
            "pot": pot,
            "entrants": lines.len(),
            "movements": movements,
        }),
        ClosePlan::Wash {
            reason,
            distinct_guesses,
        } => json!({
            "reason": reason,
            "distinct_guesses": distinct_guesses,
        }),
    };
    vec![status_transition_event(
        bet_id,
        BetStatus::Active,
        close_target(plan),
        detail,
    )]
}

/// Audit events for a resolve or wash, in append order
pub fn settle_events(
    bet_id: Uuid,
    from: BetStatus,
    plan: &SettlePlan,
    origin: Option<&ResolutionOrigin>,
    movements: &[BalanceMovement],
) -> Vec<NewAuditEvent> {
    let (ledger_event, detail) = match plan {
        SettlePlan::Payout {
            choice,
            pot,
            winners,
            ..
        } => (
            NewAuditEvent::new(
                bet_id,
                AuditEventType::PayoutApplied,
                json!({
                    "winning_choice": choice,
                    "origin": origin,
                    "pot": pot,
                    "winners": winners,
                    "movements": movements,
                }),
            ),
            json!({ "winning_choice": choice }),
        ),
        SettlePlan::Wash { reason, .. } => (
            NewAuditEvent::new(
                bet_id,
                AuditEventType::WashRefundApplied,
                json!({
                    "reason": reason,
                    "origin": origin,
                    "movements": movements,
                }),
            ),
            json!({ "reason": reason }),
        ),
    };

    vec![
        ledger_event,
        status_transition_event(bet_id, from, settle_target(plan), detail),
    ]
}
