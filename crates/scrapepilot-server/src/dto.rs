use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::job::{Job, JobError};
use scrapepilot_core::models::{ScrapeOutput, ScrapeResult};
use scrapepilot_core::request::ScrapeConfig;
use scrapepilot_core::scrape::DetectOutput;

// ---------------------------------------------------------------------------
// Scrape requests
// ---------------------------------------------------------------------------

/// Body shared by `/v1/scrape`, `/v1/scrape/detect` and `/v1/jobs`: the
/// target URL plus the scrape options at the top level.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScrapeRequest {
    /// Target URL (http or https)
    pub url: String,
    /// Scrape options: renderMode, waitFor, waitForSelector, timeout,
    /// screenshot, pdf, extractSchema, extractPrompt, actions, headers, cookies.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub options: Map<String, Value>,
}

impl ScrapeRequest {
    /// Split into URL and config, applying the server's default timeout when
    /// the caller did not pick one.
    pub fn into_parts(self, default_timeout_ms: u64) -> Result<(String, ScrapeConfig), AppError> {
        let mut options = self.options;
        options
            .entry("timeout")
            .or_insert_with(|| Value::from(default_timeout_ms));
        let config = serde_json::from_value(Value::Object(options))
            .map_err(|e| AppError::Validation(format!("Invalid scrape options: {e}")))?;
        Ok((self.url, config))
    }
}

// ---------------------------------------------------------------------------
// Scrape responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceResponse {
    pub load_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_time_ms: Option<u64>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    /// `http` or `browser`
    pub strategy: String,
    pub headers: BTreeMap<String, String>,
    pub html: String,
    pub text: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub action_results: Option<Value>,
    /// Schema-shaped extraction
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    /// Prompt extraction: `{data, format, confidence}`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub ai_extraction: Option<Value>,
    pub performance: PerformanceResponse,
}

impl TryFrom<ScrapeOutput> for ScrapeResponse {
    type Error = AppError;

    fn try_from(output: ScrapeOutput) -> Result<Self, Self::Error> {
        let capture = output.capture;
        Ok(Self {
            strategy: capture.strategy.to_string(),
            metadata: serde_json::to_value(&capture.metadata)?,
            action_results: capture
                .action_results
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            data: output.extraction.data,
            ai_extraction: output
                .extraction
                .ai_extraction
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            performance: PerformanceResponse {
                load_time_ms: capture.timing.load_time_ms,
                render_time_ms: capture.timing.render_time_ms,
                size: capture.size,
                credits_used: Some(output.credits_used),
            },
            url: capture.url,
            final_url: capture.final_url,
            status_code: capture.status_code,
            headers: capture.headers,
            html: capture.html,
            text: capture.text,
            screenshot: capture.screenshot,
            pdf: capture.pdf,
        })
    }
}

impl TryFrom<ScrapeResult> for ScrapeResponse {
    type Error = AppError;

    fn try_from(result: ScrapeResult) -> Result<Self, Self::Error> {
        Ok(Self {
            strategy: result.strategy.to_string(),
            metadata: serde_json::to_value(&result.metadata)?,
            action_results: result
                .action_results
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            ai_extraction: result
                .ai_extraction
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            data: result.data,
            performance: PerformanceResponse {
                load_time_ms: result.performance.load_time_ms,
                render_time_ms: result.performance.render_time_ms,
                size: result.performance.size,
                credits_used: None,
            },
            url: result.url,
            final_url: result.final_url,
            status_code: result.status_code,
            headers: result.headers,
            html: result.html,
            text: result.text,
            screenshot: result.screenshot,
            pdf: result.pdf,
        })
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SuggestionResponse {
    pub name: String,
    pub description: String,
    pub fields: Vec<String>,
    pub confidence: f64,
    pub prompt: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub url: String,
    pub suggestions: Vec<SuggestionResponse>,
    pub credits_used: i64,
    pub providers: Vec<String>,
}

impl DetectResponse {
    pub fn new(output: DetectOutput, providers: Vec<String>) -> Self {
        Self {
            url: output.url,
            suggestions: output
                .suggestions
                .into_iter()
                .map(|s| SuggestionResponse {
                    name: s.name,
                    description: s.description,
                    fields: s.fields,
                    confidence: s.confidence,
                    prompt: s.prompt,
                })
                .collect(),
            credits_used: output.credits_used,
            providers,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<JobError> for JobErrorResponse {
    fn from(e: JobError) -> Self {
        Self {
            code: e.code,
            message: e.message,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobMetricsResponse {
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub credits_used: i64,
    pub retries: u32,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: Uuid,
    pub url: String,
    pub status: String,
    pub progress: u8,
    #[schema(value_type = Object)]
    pub config: Value,
    pub result_id: Option<Uuid>,
    pub error: Option<JobErrorResponse>,
    pub metrics: JobMetricsResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Job> for JobResponse {
    type Error = AppError;

    fn try_from(job: Job) -> Result<Self, Self::Error> {
        Ok(Self {
            config: serde_json::to_value(&job.config)?,
            id: job.id,
            url: job.url,
            status: job.status.to_string(),
            progress: job.progress,
            result_id: job.result_id,
            error: job.error.map(Into::into),
            metrics: JobMetricsResponse {
                queued_at: job.metrics.queued_at,
                started_at: job.metrics.started_at,
                completed_at: job.metrics.completed_at,
                duration_ms: job.metrics.duration_ms,
                credits_used: job.metrics.credits_used,
                retries: job.metrics.retries,
            },
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    /// pending, processing, completed or failed
    pub status: Option<String>,
    /// 1..=100, default 20
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResultResponse {
    pub job_id: Uuid,
    pub result_id: Uuid,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub result: ScrapeResponse,
}

// ---------------------------------------------------------------------------
// AI status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AiStatusResponse {
    pub configured: bool,
    /// Configured backends, in the order they are tried
    pub providers: Vec<String>,
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    /// Remaining credits; `null` for unlimited plans
    pub balance: Option<i64>,
    pub unlimited: bool,
}

impl From<i64> for CreditsResponse {
    fn from(balance: i64) -> Self {
        let unlimited = balance < 0;
        Self {
            balance: (!unlimited).then_some(balance),
            unlimited,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Stable error code, e.g. `INSUFFICIENT_CREDITS`
    pub error: String,
    pub message: String,
}
