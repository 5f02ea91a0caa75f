//! Durable resolution job queue on PostgreSQL
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several workers (or processes)
//! can poll the same table. A wager with a running job is never claimed
//! again until that job finishes: a transaction-scoped advisory lock per
//! wager serializes concurrent claimers, and a partial unique index allows
//! at most one running job per wager.

use crate::domain::{EnqueueOutcome, JobKind, JobStatus, NewJob, ResolutionJob};
use crate::error::{Result, WagerError};
use crate::persistence::{JobQueue, QueueStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, kind, bet_id, payload, idempotency_key, status, attempts,
    max_attempts, run_at, last_error
"#;

/// Rows scanned per requested job, so wagers with several due jobs still
/// fill a claim
const CLAIM_SCAN_FACTOR: usize = 4;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    default_max_attempts: u32,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, default_max_attempts: u32) -> Self {
        Self {
            pool,
            default_max_attempts,
        }
    }
}

fn row_to_job(r: &PgRow) -> Result<ResolutionJob> {
    let kind: String = r.get("kind");
    let status: String = r.get("status");
    let attempts: i32 = r.get("attempts");
    let max_attempts: i32 = r.get("max_attempts");

    Ok(ResolutionJob {
        id: r.get("id"),
        kind: JobKind::try_from(kind.as_str()).map_err(WagerError::Queue)?,
        bet_id: r.get("bet_id"),
        payload: r.get("payload"),
        idempotency_key: r.get("idempotency_key"),
        status: JobStatus::try_from(status.as_str()).map_err(WagerError::Queue)?,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(1) as u32,
        run_at: r.get("run_at"),
        last_error: r.get("last_error"),
    })
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip(self, job), fields(kind = %job.kind, bet_id = %job.bet_id))]
    async fn enqueue(&self, job: NewJob) -> Result<EnqueueOutcome> {
        let key = job.idempotency_key();
        let id = Uuid::new_v4();
        let max_attempts = job.max_attempts.unwrap_or(self.default_max_attempts) as i32;

        let inserted = sqlx::query(
            r#"
            INSERT INTO resolution_jobs (
                id, kind, bet_id, payload, idempotency_key, max_attempts, run_at
            ) VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()))
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(job.kind.as_str())
        .bind(job.bet_id)
        .bind(&job.payload)
        .bind(&key)
        .bind(max_attempts)
        .bind(job.run_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            debug!(key = %key, "Enqueued job {}", id);
            return Ok(EnqueueOutcome::Enqueued(id));
        }

        let existing: Uuid =
            sqlx::query("SELECT id FROM resolution_jobs WHERE idempotency_key = $1")
                .bind(&key)
                .fetch_one(&self.pool)
                .await?
                .get("id");
        debug!(key = %key, "Duplicate enqueue ignored, existing job {}", existing);
        Ok(EnqueueOutcome::Duplicate(existing))
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResolutionJob>> {
        // Candidates are row-locked with SKIP LOCKED; the per-bet advisory
        // lock keeps a second claimer off the bet's later jobs, and the
        // partial unique index on running jobs backs both.
        let sql = format!(
            r#"
            WITH candidates AS (
                SELECT j.id, j.bet_id, j.run_at, j.created_at
                FROM resolution_jobs j
                WHERE j.status = 'queued'
                  AND j.run_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM resolution_jobs r
                      WHERE r.bet_id = j.bet_id AND r.status = 'running'
                  )
                ORDER BY j.run_at, j.created_at
                LIMIT $4
                FOR UPDATE OF j SKIP LOCKED
            ),
            picked AS (
                SELECT DISTINCT ON (c.bet_id) c.id, c.run_at
                FROM candidates c
                WHERE pg_try_advisory_xact_lock(hashtextextended(c.bet_id::text, 0))
                ORDER BY c.bet_id, c.run_at, c.created_at
            )
            UPDATE resolution_jobs SET
                status = 'running',
                attempts = attempts + 1,
                locked_at = $1,
                locked_by = $2,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM picked ORDER BY run_at LIMIT $3)
              AND status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(worker_id)
            .bind(limit as i64)
            .bind((limit * CLAIM_SCAN_FACTOR) as i64)
            .fetch_all(&self.pool)
            .await;
        let rows = match result {
            Ok(rows) => rows,
            Err(e) if is_unique_violation(&e) => {
                debug!("{} lost a claim race on a running bet, retrying next poll", worker_id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| j.run_at);
        if !jobs.is_empty() {
            debug!("{} claimed {} job(s)", worker_id, jobs.len());
        }
        Ok(jobs)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resolution_jobs SET
                status = 'completed',
                locked_at = NULL,
                locked_by = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_later(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resolution_jobs SET
                status = 'queued',
                run_at = $2,
                last_error = $3,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resolution_jobs SET
                status = 'failed',
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        warn!("Job {} failed permanently: {}", job_id, error);
        Ok(())
    }

    async fn reschedule(&self, idempotency_key: &str, run_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs SET run_at = $2, updated_at = NOW()
            WHERE idempotency_key = $1 AND status = 'queued'
            "#,
        )
        .bind(idempotency_key)
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn requeue_stale(&self, lease: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        let result = sqlx::query(
            r#"
            UPDATE resolution_jobs SET
                status = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                last_error = 'lease expired',
                updated_at = NOW()
            WHERE status = 'running' AND locked_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!("Requeued {} job(s) with expired leases", requeued);
        }
        Ok(requeued)
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<ResolutionJob>> {
        let sql = format!("SELECT {} FROM resolution_jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM resolution_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for r in rows {
            let status: String = r.get("status");
            let n = r.get::<i64, _>("n").max(0) as u64;
            match status.as_str() {
                "queued" => stats.queued = n,
                "running" => stats.running = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                _ => {}
            }
        }
        Ok(stats)
    }
}
