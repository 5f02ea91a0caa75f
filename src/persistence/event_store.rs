//! Resolution history backed by PostgreSQL
//!
//! `resolution_history` is append-only; a trigger rejects UPDATE and DELETE.
//! Ledger transitions write their events through [`append_in`] on the same
//! connection as the balance updates so both commit or neither does.

use super::store::AuditLog;
use crate::domain::{AuditEvent, AuditEventType, NewAuditEvent};
use crate::error::{Result, WagerError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use tracing::debug;
use uuid::Uuid;

/// Append an event using an existing connection or transaction
pub async fn append_in(conn: &mut PgConnection, event: &NewAuditEvent) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO resolution_history (bet_id, event_type, payload)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(event.bet_id)
    .bind(event.event_type.as_str())
    .bind(&event.payload)
    .fetch_one(conn)
    .await?;

    let id: i64 = row.get("id");
    debug!(
        "Appended {} event {} for bet {}",
        event.event_type, id, event.bet_id
    );
    Ok(id)
}

fn row_to_event(r: &PgRow) -> Result<AuditEvent> {
    let event_type: String = r.get("event_type");
    Ok(AuditEvent {
        id: r.get("id"),
        bet_id: r.get("bet_id"),
        event_type: AuditEventType::try_from(event_type.as_str()).map_err(WagerError::Internal)?,
        payload: r.get("payload"),
        created_at: r.get("created_at"),
    })
}

/// Audit log for persisting resolution events
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, event: NewAuditEvent) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        append_in(&mut conn, &event).await
    }

    async fn append_once(&self, key: &str, event: NewAuditEvent) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO resolution_history (bet_id, event_type, payload, dedupe_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (dedupe_key) WHERE dedupe_key IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.bet_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.get("id"))),
            None => {
                debug!(key = %key, "Audit event already recorded");
                Ok(None)
            }
        }
    }

    async fn trail(&self, bet_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, bet_id, event_type, payload, created_at
            FROM resolution_history
            WHERE bet_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(bet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}
