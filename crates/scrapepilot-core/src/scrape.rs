use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobError, JobStatus, NewJob, RetryPolicy, elapsed_ms};
use crate::job_queue::JobQueue;
use crate::models::{
    ExtractionOutput, ExtractionSuggestion, Identity, Permission, ScrapeOutput, ScrapeResult,
};
use crate::orchestrator::{Orchestrator, calculate_credits, credit_costs};
use crate::request::{ScrapeConfig, validate_target_url};
use crate::traits::{AccountLedger, Extractor, JobStore, Renderer, ResultStore, Storage};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Response of an extraction-target detection call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectOutput {
    pub url: String,
    pub suggestions: Vec<ExtractionSuggestion>,
    pub credits_used: i64,
}

/// Entry points of the scrape pipeline: the synchronous path, job submission
/// and job queries.
///
/// Generic over every collaborator so the same service runs against
/// PostgreSQL in production and in-memory doubles in tests.
#[derive(Clone)]
pub struct ScrapeService<H, B, X, S>
where
    H: Renderer,
    B: Renderer,
    X: Extractor,
    S: Storage,
{
    orchestrator: Orchestrator<H, B>,
    extractor: X,
    storage: S,
    retry_policy: RetryPolicy,
    extraction_timeout: Duration,
}

impl<H, B, X, S> ScrapeService<H, B, X, S>
where
    H: Renderer,
    B: Renderer,
    X: Extractor,
    S: Storage,
{
    pub fn new(orchestrator: Orchestrator<H, B>, extractor: X, storage: S) -> Self {
        Self {
            orchestrator,
            extractor,
            storage,
            retry_policy: RetryPolicy::default(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    /// Attempt limit stamped on queue entries created by [`enqueue_scrape`](Self::enqueue_scrape).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Deadline for the extraction stage; slower backends leave their
    /// output absent.
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn extraction_timeout(&self) -> Duration {
        self.extraction_timeout
    }

    pub fn orchestrator(&self) -> &Orchestrator<H, B> {
        &self.orchestrator
    }

    pub fn extractor(&self) -> &X {
        &self.extractor
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Scrape inline and return the capture with any extracted data.
    ///
    /// Credits are checked before rendering and deducted atomically after it;
    /// losing the deduction race to a concurrent request discards the output.
    pub async fn scrape_synchronous(
        &self,
        identity: &Identity,
        url: &str,
        config: ScrapeConfig,
    ) -> Result<ScrapeOutput, AppError> {
        identity.require(Permission::Scrape)?;
        validate_target_url(url)?;
        config.validate()?;

        let credits = calculate_credits(&config);
        self.ensure_balance(identity.user_id, credits).await?;

        let capture = self.orchestrator.scrape(url, &config).await?;
        let extraction = self.run_extraction(&capture.html, &config).await;

        let remaining = self
            .storage
            .ledger()
            .deduct(identity.user_id, credits)
            .await?;
        tracing::info!(user_id = %identity.user_id, credits, remaining, "Synchronous scrape charged");

        Ok(ScrapeOutput {
            capture,
            extraction,
            credits_used: credits,
        })
    }

    /// Create a pending job and put it on the queue.
    ///
    /// Credits are only checked here; the worker charges them once the
    /// result has been saved.
    pub async fn enqueue_scrape(
        &self,
        identity: &Identity,
        url: &str,
        config: ScrapeConfig,
    ) -> Result<Job, AppError> {
        identity.require(Permission::Scrape)?;
        validate_target_url(url)?;
        config.validate()?;
        self.ensure_balance(identity.user_id, calculate_credits(&config))
            .await?;

        let job = self
            .storage
            .jobs()
            .create(NewJob {
                owner_id: identity.user_id,
                credential_id: identity.credential_id,
                url: url.to_string(),
                config,
            })
            .await?;

        if let Err(e) = self
            .storage
            .queue()
            .enqueue(job.id, self.retry_policy.max_attempts)
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            let now = chrono::Utc::now();
            let error = JobError {
                code: "INTERNAL_ERROR".to_string(),
                message: format!("Failed to enqueue job: {e}"),
            };
            let duration = elapsed_ms(job.metrics.queued_at, now);
            if let Err(fail_err) = self.storage.jobs().fail(job.id, error, now, duration).await {
                tracing::error!(job_id = %job.id, error = %fail_err, "Failed to mark unqueued job failed");
            }
            return Err(e);
        }

        tracing::info!(job_id = %job.id, url = %job.url, "Job enqueued");
        Ok(job)
    }

    /// Fetch a job owned by `owner_id`. Other owners' jobs are not found.
    pub async fn get_job_status(&self, owner_id: Uuid, job_id: Uuid) -> Result<Job, AppError> {
        self.storage
            .jobs()
            .get(job_id)
            .await?
            .filter(|job| job.owner_id == owner_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
    }

    pub async fn get_job_result(
        &self,
        owner_id: Uuid,
        job_id: Uuid,
    ) -> Result<ScrapeResult, AppError> {
        let job = self.get_job_status(owner_id, job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(AppError::JobNotReady(job_id.to_string()));
        }
        let result_id = job
            .result_id
            .ok_or_else(|| AppError::NotFound(format!("Result for job {job_id} not found")))?;

        self.storage
            .results()
            .get(result_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))
    }

    /// Newest first. `limit` is clamped to `1..=100`.
    pub async fn list_jobs(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        self.storage
            .jobs()
            .list(owner_id, status, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    /// Cancel a job that has not started yet.
    pub async fn cancel_job(&self, owner_id: Uuid, job_id: Uuid) -> Result<Job, AppError> {
        let job = self.get_job_status(owner_id, job_id).await?;
        if job.status != JobStatus::Pending || !self.storage.jobs().cancel(job_id).await? {
            return Err(AppError::NotCancellable(job_id.to_string()));
        }

        if let Err(e) = self.storage.queue().ack(job_id).await {
            // The worker acks terminal jobs it claims, so a stale entry is harmless.
            tracing::warn!(%job_id, error = %e, "Failed to drop queue entry of cancelled job");
        }
        tracing::info!(%job_id, "Job cancelled");

        self.get_job_status(owner_id, job_id).await
    }

    /// Render a page and ask the extraction backend what could be extracted.
    pub async fn detect_extractable(
        &self,
        identity: &Identity,
        url: &str,
        config: ScrapeConfig,
    ) -> Result<DetectOutput, AppError> {
        identity.require(Permission::Scrape)?;
        validate_target_url(url)?;
        config.validate()?;
        if !self.extractor.is_configured() {
            return Err(AppError::ExtractionUnavailable);
        }

        let credits = credit_costs::DETECT;
        self.ensure_balance(identity.user_id, credits).await?;

        let capture = self.orchestrator.scrape(url, &config).await?;
        let deadline = Instant::now() + self.extraction_timeout;
        let suggestions = until_deadline(
            deadline,
            "detection",
            self.extractor.detect_extractable(&capture.html),
        )
        .await
        .unwrap_or_default();

        self.storage
            .ledger()
            .deduct(identity.user_id, credits)
            .await?;

        Ok(DetectOutput {
            url: url.to_string(),
            suggestions,
            credits_used: credits,
        })
    }

    /// Run the requested extraction operations within the extraction
    /// timeout. Never fails: a backend problem leaves the corresponding
    /// field absent.
    pub async fn run_extraction(&self, html: &str, config: &ScrapeConfig) -> ExtractionOutput {
        let deadline = Instant::now() + self.extraction_timeout;
        self.run_extraction_until(html, config, deadline).await
    }

    /// [`run_extraction`](Self::run_extraction) with an explicit deadline.
    /// Whatever has not answered by `deadline` is left absent.
    pub async fn run_extraction_until(
        &self,
        html: &str,
        config: &ScrapeConfig,
        deadline: Instant,
    ) -> ExtractionOutput {
        let mut output = ExtractionOutput::default();

        if let Some(schema) = &config.extract_schema {
            let answer = until_deadline(
                deadline,
                "schema extraction",
                self.extractor.extract_by_schema(html, schema),
            )
            .await;
            if answer.as_ref().is_some_and(Option::is_none) && self.extractor.is_configured() {
                tracing::warn!("Schema extraction produced no data");
            }
            output.data = answer.flatten();
        }

        if let Some(prompt) = &config.extract_prompt {
            let answer = until_deadline(
                deadline,
                "prompt extraction",
                self.extractor.extract_by_prompt(html, prompt),
            )
            .await;
            if answer.as_ref().is_some_and(Option::is_none) && self.extractor.is_configured() {
                tracing::warn!("Prompt extraction produced no data");
            }
            output.ai_extraction = answer.flatten();
        }

        output
    }

    /// Reject up front when a limited account cannot cover `credits`.
    pub(crate) async fn ensure_balance(&self, user_id: Uuid, credits: i64) -> Result<(), AppError> {
        let balance = self.storage.ledger().get_balance(user_id).await?;
        if balance >= 0 && balance < credits {
            return Err(AppError::InsufficientCredits {
                required: credits,
                available: balance,
            });
        }
        Ok(())
    }
}

/// Await `work` until `deadline`. `None` once the deadline has passed.
pub async fn until_deadline<T>(
    deadline: Instant,
    stage: &str,
    work: impl Future<Output = T>,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, work).await {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(stage, "Extraction deadline passed, leaving output absent");
            None
        }
    }
}
