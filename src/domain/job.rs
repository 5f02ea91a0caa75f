use super::{AuditEventType, ModeKey, NewAuditEvent};
use crate::error::{Result, WagerError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kinds of resolution jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// active -> pending (or washed) when the window closes
    CloseBet,
    SetWinningChoice,
    Wash,
    RecordAudit,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CloseBet => "close_bet",
            JobKind::SetWinningChoice => "set_winning_choice",
            JobKind::Wash => "wash",
            JobKind::RecordAudit => "record_audit",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "close_bet" => Ok(JobKind::CloseBet),
            "set_winning_choice" => Ok(JobKind::SetWinningChoice),
            "wash" => Ok(JobKind::Wash),
            "record_audit" => Ok(JobKind::RecordAudit),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Who decided a winning choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResolutionOrigin {
    Validator { mode: ModeKey },
    Manual { actor: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetWinningChoicePayload {
    pub choice: String,
    pub origin: ResolutionOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAuditPayload {
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
}

/// Idempotency key for a job: derived from the job kind and the wager id
pub fn idempotency_key(kind: JobKind, bet_id: Uuid, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) => format!("{}:{}:{}", kind, bet_id, s),
        None => format!("{}:{}", kind, bet_id),
    }
}

/// A job to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub bet_id: Uuid,
    pub payload: serde_json::Value,
    /// Earliest execution time, `None` for immediately
    pub run_at: Option<DateTime<Utc>>,
    /// Overrides the queue default
    pub max_attempts: Option<u32>,
    pub key_suffix: Option<String>,
}

impl NewJob {
    pub fn close_bet(bet_id: Uuid, close_time: DateTime<Utc>) -> Self {
        Self {
            kind: JobKind::CloseBet,
            bet_id,
            payload: serde_json::json!({}),
            run_at: Some(close_time),
            max_attempts: None,
            key_suffix: None,
        }
    }

    pub fn set_winning_choice(bet_id: Uuid, choice: &str, origin: ResolutionOrigin) -> Result<Self> {
        let payload = SetWinningChoicePayload {
            choice: choice.to_string(),
            origin,
        };
        Ok(Self {
            kind: JobKind::SetWinningChoice,
            bet_id,
            payload: serde_json::to_value(payload)?,
            run_at: None,
            max_attempts: None,
            key_suffix: None,
        })
    }

    pub fn wash(bet_id: Uuid, reason: &str) -> Self {
        Self {
            kind: JobKind::Wash,
            bet_id,
            payload: serde_json::json!({ "reason": reason }),
            run_at: None,
            max_attempts: None,
            key_suffix: None,
        }
    }

    /// Audit jobs are keyed by event type too, so distinct events for one
    /// wager never collapse into each other.
    pub fn record_audit(event: NewAuditEvent, discriminator: Option<&str>) -> Result<Self> {
        let suffix = match discriminator {
            Some(d) => format!("{}:{}", event.event_type, d),
            None => event.event_type.to_string(),
        };
        let payload = RecordAuditPayload {
            event_type: event.event_type,
            payload: event.payload,
        };
        Ok(Self {
            kind: JobKind::RecordAudit,
            bet_id: event.bet_id,
            payload: serde_json::to_value(payload)?,
            run_at: None,
            max_attempts: None,
            key_suffix: Some(suffix),
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Distinguish this job from another of the same kind for the same wager
    pub fn with_key_suffix(mut self, suffix: &str) -> Self {
        self.key_suffix = Some(suffix.to_string());
        self
    }

    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.kind, self.bet_id, self.key_suffix.as_deref())
    }
}

/// A persisted job
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub bet_id: Uuid,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub status: JobStatus,
    /// Attempts made so far, including the current one once claimed
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ResolutionJob {
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            WagerError::Queue(format!(
                "invalid payload for {} job {}: {}",
                self.kind, self.id, e
            ))
        })
    }
}

/// Result of an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(Uuid),
    /// A job with the same idempotency key already exists
    Duplicate(Uuid),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_shape() {
        let bet = Uuid::nil();
        let job = NewJob::close_bet(bet, Utc::now());
        assert_eq!(
            job.idempotency_key(),
            "close_bet:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_audit_jobs_do_not_collapse_across_event_types() {
        let bet = Uuid::new_v4();
        let a = NewJob::record_audit(
            NewAuditEvent::new(bet, AuditEventType::BaselineCaptured, serde_json::json!({})),
            None,
        )
        .unwrap();
        let b = NewJob::record_audit(
            NewAuditEvent::new(bet, AuditEventType::ModeResultComputed, serde_json::json!({})),
            None,
        )
        .unwrap();
        assert_ne!(a.idempotency_key(), b.idempotency_key());
    }

    #[test]
    fn test_record_audit_payload_carries_event() {
        let bet = Uuid::new_v4();
        let job = NewJob::record_audit(
            NewAuditEvent::new(
                bet,
                AuditEventType::BaselineCaptured,
                serde_json::json!({ "plays": 4 }),
            ),
            Some("q2"),
        )
        .unwrap();
        assert!(!job.payload.is_null());
        let parsed: RecordAuditPayload = serde_json::from_value(job.payload.clone()).unwrap();
        assert_eq!(parsed.event_type, AuditEventType::BaselineCaptured);
        assert_eq!(parsed.payload["plays"], 4);
        assert!(job.idempotency_key().ends_with("baseline_captured:q2"));
    }

    #[test]
    fn test_set_winning_choice_payload() {
        let job = NewJob::set_winning_choice(
            Uuid::new_v4(),
            "TD",
            ResolutionOrigin::Validator {
                mode: ModeKey::NflNextScore,
            },
        )
        .unwrap();
        let parsed: SetWinningChoicePayload = serde_json::from_value(job.payload).unwrap();
        assert_eq!(parsed.choice, "TD");
        assert_eq!(
            parsed.origin,
            ResolutionOrigin::Validator {
                mode: ModeKey::NflNextScore
            }
        );
    }

    #[test]
    fn test_manual_override_key_differs_from_validator_key() {
        let bet = Uuid::new_v4();
        let validator = NewJob::set_winning_choice(
            bet,
            "TD",
            ResolutionOrigin::Validator {
                mode: ModeKey::NflNextScore,
            },
        )
        .unwrap();
        let manual = NewJob::set_winning_choice(
            bet,
            "FG",
            ResolutionOrigin::Manual {
                actor: Uuid::new_v4(),
            },
        )
        .unwrap()
        .with_key_suffix("manual");
        assert_ne!(validator.idempotency_key(), manual.idempotency_key());
        assert!(manual.idempotency_key().ends_with(":manual"));
    }
}
