use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::job::JobStatus;
use scrapepilot_core::models::{Identity, Permission};
use scrapepilot_core::scrape::DEFAULT_LIST_LIMIT;
use scrapepilot_core::traits::{AccountLedger, Extractor, Storage};

use crate::auth::require_api_key;
use crate::dto::{
    AiStatusResponse, CreateJobResponse, CreditsResponse, DetectResponse, HealthResponse,
    JobListResponse, JobResponse, JobResultResponse, ListJobsQuery, ScrapeRequest, ScrapeResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/scrape/detect", post(detect))
        .route("/v1/jobs", post(create_job).get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/v1/jobs/{id}/result", get(get_job_result))
        .route("/v1/ai/status", get(ai_status))
        .route("/v1/usage/credits", get(credits))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn job_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    Ok(path?.0)
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Page capture with any extracted data", body = ScrapeResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
        (status = 402, description = "Insufficient credits", body = crate::dto::ErrorResponse),
        (status = 502, description = "Target could not be reached", body = crate::dto::ErrorResponse),
        (status = 504, description = "Render timed out", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let (url, config) = body.into_parts(state.default_timeout_ms)?;

    let output = state
        .service
        .scrape_synchronous(&identity, &url, config)
        .await?;

    Ok(Json(ScrapeResponse::try_from(output)?))
}

#[utoipa::path(
    post,
    path = "/v1/scrape/detect",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Extraction suggestions", body = DetectResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 402, description = "Insufficient credits", body = crate::dto::ErrorResponse),
        (status = 503, description = "AI extraction not configured", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn detect(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let (url, config) = body.into_parts(state.default_timeout_ms)?;

    let output = state
        .service
        .detect_extractable(&identity, &url, config)
        .await?;
    let providers = state.service.extractor().providers();

    Ok(Json(DetectResponse::new(output, providers)))
}

#[utoipa::path(
    get,
    path = "/v1/ai/status",
    responses(
        (status = 200, description = "Extraction backend availability", body = AiStatusResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "scrape"
)]
pub async fn ai_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let extractor = state.service.extractor();
    Json(AiStatusResponse {
        configured: extractor.is_configured(),
        providers: extractor.providers(),
    })
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = ScrapeRequest,
    responses(
        (status = 202, description = "Job queued", body = CreateJobResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
        (status = 402, description = "Insufficient credits", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let (url, config) = body.into_parts(state.default_timeout_ms)?;

    let job = state.service.enqueue_scrape(&identity, &url, config).await?;

    let response = CreateJobResponse {
        job_id: job.id,
        status: job.status.to_string(),
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "The caller's jobs, newest first", body = JobListResponse),
        (status = 400, description = "Invalid filter", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    identity.require(Permission::Scrape)?;
    let Query(query) = query?;

    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::Validation))
        .transpose()?;

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = state
        .service
        .list_jobs(identity.user_id, status_filter, limit)
        .await?;

    let jobs = jobs
        .into_iter()
        .map(JobResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let total = jobs.len();

    Ok(Json(JobListResponse { jobs, total }))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    identity.require(Permission::Scrape)?;
    let id = job_id(path)?;

    let job = state.service.get_job_status(identity.user_id, id).await?;
    Ok(Json(JobResponse::try_from(job)?))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Stored result of a completed job", body = JobResultResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Job has not completed", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    identity.require(Permission::Scrape)?;
    let id = job_id(path)?;

    let result = state.service.get_job_result(identity.user_id, id).await?;
    Ok(Json(JobResultResponse {
        job_id: result.job_id,
        result_id: result.id,
        content_hash: result.content_hash.clone(),
        created_at: result.created_at,
        result: ScrapeResponse::try_from(result)?,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job cancelled", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Job is no longer pending", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    identity.require(Permission::Scrape)?;
    let id = job_id(path)?;

    let job = state.service.cancel_job(identity.user_id, id).await?;
    Ok(Json(JobResponse::try_from(job)?))
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/usage/credits",
    responses(
        (status = 200, description = "The caller's credit balance", body = CreditsResponse),
        (status = 401, description = "Unauthorized", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "usage"
)]
pub async fn credits(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state
        .service
        .storage()
        .ledger()
        .get_balance(identity.user_id)
        .await?;
    Ok(Json(CreditsResponse::from(balance)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.db.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check failed: {e}");
            "error"
        }
    };

    let (status, label) = if db_status == "ok" {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: label,
        database: db_status,
    };

    (status, Json(response))
}
