use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::models::{
    ActionResult, NewScrapeResult, PageMetadata, Performance, PromptExtraction, ScrapeResult,
};
use scrapepilot_core::traits::ResultStore;

use crate::database::db_err;

/// PostgreSQL-backed result records. `job_id` is unique, so a redelivered
/// job can never store a second result.
#[derive(Clone)]
pub struct ResultRepository {
    pool: Pool<Postgres>,
}

impl ResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: Uuid,
    job_id: Uuid,
    owner_id: Uuid,
    url: String,
    final_url: String,
    status_code: i32,
    headers: Json<BTreeMap<String, String>>,
    html: String,
    text: String,
    metadata: Json<PageMetadata>,
    content_hash: String,
    screenshot: Option<String>,
    pdf: Option<String>,
    data: Option<serde_json::Value>,
    ai_extraction: Option<Json<PromptExtraction>>,
    action_results: Option<Json<Vec<ActionResult>>>,
    strategy: String,
    load_time_ms: i64,
    render_time_ms: Option<i64>,
    size: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for ScrapeResult {
    type Error = AppError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let strategy = row
            .strategy
            .parse()
            .map_err(|e: String| AppError::DatabaseError(format!("result {}: {e}", row.id)))?;

        Ok(ScrapeResult {
            id: row.id,
            job_id: row.job_id,
            owner_id: row.owner_id,
            url: row.url,
            final_url: row.final_url,
            status_code: row.status_code.clamp(0, u16::MAX as i32) as u16,
            headers: row.headers.0,
            html: row.html,
            text: row.text,
            metadata: row.metadata.0,
            content_hash: row.content_hash,
            screenshot: row.screenshot,
            pdf: row.pdf,
            data: row.data,
            ai_extraction: row.ai_extraction.map(|j| j.0),
            action_results: row.action_results.map(|j| j.0),
            strategy,
            performance: Performance {
                load_time_ms: row.load_time_ms.max(0) as u64,
                render_time_ms: row.render_time_ms.map(|ms| ms.max(0) as u64),
                size: row.size.max(0) as u64,
            },
            created_at: row.created_at,
        })
    }
}

impl ResultStore for ResultRepository {
    async fn save(&self, result: NewScrapeResult) -> Result<Uuid, AppError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO scrape_results (
                job_id, owner_id, url, final_url, status_code, headers, html, text,
                metadata, content_hash, screenshot, pdf, data, ai_extraction,
                action_results, strategy, load_time_ms, render_time_ms, size
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (job_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(result.job_id)
        .bind(result.owner_id)
        .bind(&result.url)
        .bind(&result.final_url)
        .bind(result.status_code as i32)
        .bind(Json(&result.headers))
        .bind(&result.html)
        .bind(&result.text)
        .bind(Json(&result.metadata))
        .bind(&result.content_hash)
        .bind(&result.screenshot)
        .bind(&result.pdf)
        .bind(&result.data)
        .bind(result.ai_extraction.as_ref().map(Json))
        .bind(result.action_results.as_ref().map(Json))
        .bind(result.strategy.as_str())
        .bind(result.performance.load_time_ms as i64)
        .bind(result.performance.render_time_ms.map(|ms| ms as i64))
        .bind(result.performance.size as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        tracing::debug!(job_id = %result.job_id, "Result already stored, reusing it");
        self.find_by_job(result.job_id).await?.ok_or_else(|| {
            AppError::DatabaseError(format!(
                "result for job {} vanished after a conflicting insert",
                result.job_id
            ))
        })
    }

    async fn get(&self, result_id: Uuid) -> Result<Option<ScrapeResult>, AppError> {
        let row = sqlx::query_as::<_, ResultRow>(r#"SELECT * FROM scrape_results WHERE id = $1"#)
            .bind(result_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(ScrapeResult::try_from).transpose()
    }

    async fn find_by_job(&self, job_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT id FROM scrape_results WHERE job_id = $1"#)
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(row.map(|(id,)| id))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(r#"DELETE FROM scrape_results WHERE created_at < $1"#)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
