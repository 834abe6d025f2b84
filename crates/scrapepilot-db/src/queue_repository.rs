use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::job_queue::{JobQueue, QueueEntry};

use crate::database::db_err;

/// Claims older than this are considered abandoned and handed out again.
/// Kept well above the default per-job time budget.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(600);

/// PostgreSQL-backed delivery queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool<Postgres>,
    visibility_timeout: Duration,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT job_id, attempt, max_attempts, available_at, claimed_by
            FROM job_queue WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    job_id: Uuid,
    attempt: i32,
    max_attempts: i32,
    available_at: DateTime<Utc>,
    claimed_by: Option<String>,
}

impl From<QueueRow> for QueueEntry {
    fn from(row: QueueRow) -> Self {
        QueueEntry {
            job_id: row.job_id,
            attempt: row.attempt.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            available_at: row.available_at,
            claimed_by: row.claimed_by,
        }
    }
}

impl JobQueue for QueueRepository {
    async fn enqueue(&self, job_id: Uuid, max_attempts: u32) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO job_queue (job_id, max_attempts)
            VALUES ($1, $2)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(max_attempts.max(1) as i32)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE job_queue
            SET attempt = attempt + 1, claimed_by = $1, claimed_at = NOW()
            WHERE job_id = (
                SELECT job_id FROM job_queue
                WHERE (claimed_by IS NULL AND available_at <= NOW())
                   OR (claimed_by IS NOT NULL AND claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY available_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id, attempt, max_attempts, available_at, claimed_by
            "#,
        )
        .bind(worker_id)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(r#"DELETE FROM job_queue WHERE job_id = $1"#)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn retry(&self, job_id: Uuid, available_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_by = NULL, claimed_at = NULL, available_at = $2
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(available_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64, AppError> {
        // The interrupted delivery does not count against the attempt limit.
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET claimed_by = NULL, claimed_at = NULL, attempt = GREATEST(attempt - 1, 0)
            WHERE claimed_by = $1
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn depth(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM job_queue"#)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(count)
    }
}
