use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Audit trail taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PayoutApplied,
    WashRefundApplied,
    StatusTransition,
    ManualOverride,
    BaselineCaptured,
    ModeResultComputed,
    ResolutionFailed,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 7] = [
        AuditEventType::PayoutApplied,
        AuditEventType::WashRefundApplied,
        AuditEventType::StatusTransition,
        AuditEventType::ManualOverride,
        AuditEventType::BaselineCaptured,
        AuditEventType::ModeResultComputed,
        AuditEventType::ResolutionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PayoutApplied => "payout_applied",
            AuditEventType::WashRefundApplied => "wash_refund_applied",
            AuditEventType::StatusTransition => "status_transition",
            AuditEventType::ManualOverride => "manual_override",
            AuditEventType::BaselineCaptured => "baseline_captured",
            AuditEventType::ModeResultComputed => "mode_result_computed",
            AuditEventType::ResolutionFailed => "resolution_failed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AuditEventType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        AuditEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown audit event type: {}", s))
    }
}

/// An immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub bet_id: Uuid,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An audit record not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub bet_id: Uuid,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(bet_id: Uuid, event_type: AuditEventType, payload: serde_json::Value) -> Self {
        Self {
            bet_id,
            event_type,
            payload,
        }
    }
}
