use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::job::{
    CANCELLED_CODE, CANCELLED_MESSAGE, Job, JobCompletion, JobError, JobMetrics, JobStatus, NewJob,
};
use scrapepilot_core::request::ScrapeConfig;
use scrapepilot_core::traits::JobStore;

use crate::database::db_err;

/// PostgreSQL-backed job records.
///
/// Status changes are single conditional `UPDATE`s, so a cancel racing a
/// claim resolves inside the database.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    owner_id: Uuid,
    credential_id: Uuid,
    url: String,
    config: serde_json::Value,
    status: String,
    progress: i16,
    result_id: Option<Uuid>,
    error_code: Option<String>,
    error_message: Option<String>,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    credits_used: i64,
    retries: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let config: ScrapeConfig = serde_json::from_value(row.config)?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| AppError::DatabaseError(format!("job {}: {e}", row.id)))?;
        let error = row.error_code.map(|code| JobError {
            code,
            message: row.error_message.unwrap_or_default(),
        });

        Ok(Job {
            id: row.id,
            owner_id: row.owner_id,
            credential_id: row.credential_id,
            url: row.url,
            config,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            result_id: row.result_id,
            error,
            metrics: JobMetrics {
                queued_at: row.queued_at,
                started_at: row.started_at,
                completed_at: row.completed_at,
                duration_ms: row.duration_ms.map(|ms| ms.max(0) as u64),
                credits_used: row.credits_used,
                retries: row.retries.max(0) as u32,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, AppError> {
    rows.into_iter().map(Job::try_from).collect()
}

impl JobStore for JobRepository {
    async fn create(&self, request: NewJob) -> Result<Job, AppError> {
        let config = serde_json::to_value(&request.config)?;
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO scrape_jobs (owner_id, credential_id, url, config)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(request.owner_id)
        .bind(request.credential_id)
        .bind(&request.url)
        .bind(config)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM scrape_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Job::try_from).transpose()
    }

    async fn list(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM scrape_jobs
                WHERE owner_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3
                "#,
            )
            .bind(owner_id)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM scrape_jobs
                WHERE owner_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(owner_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(db_err)?;

        into_jobs(rows)
    }

    async fn mark_processing(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'processing', progress = $3, started_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(started_at)
        .bind(JobStatus::Processing.initial_progress() as i16)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET progress = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(progress.min(100) as i16)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn record_retry(&self, job_id: Uuid, retries: u32) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE scrape_jobs SET retries = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(job_id)
            .bind(retries as i32)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn complete(&self, job_id: Uuid, completion: JobCompletion) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'completed', progress = 100, result_id = $2,
                completed_at = $3, duration_ms = $4,
                error_code = NULL, error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(completion.result_id)
        .bind(completion.completed_at)
        .bind(completion.duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: JobError,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'failed', progress = 100, error_code = $2, error_message = $3,
                completed_at = $4, duration_ms = $5, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(&error.code)
        .bind(&error.message)
        .bind(completed_at)
        .bind(duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'failed', progress = 100, error_code = $2, error_message = $3,
                completed_at = NOW(),
                duration_ms = GREATEST((EXTRACT(EPOCH FROM (NOW() - queued_at)) * 1000)::BIGINT, 0),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(CANCELLED_CODE)
        .bind(CANCELLED_MESSAGE)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(r#"DELETE FROM scrape_jobs WHERE created_at < $1"#)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
