use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobCompletion, JobError, JobStatus, NewJob};
use crate::job_queue::JobQueue;
use crate::models::{
    ExtractionSuggestion, Identity, NewScrapeResult, PromptExtraction, RenderCapture, ScrapeResult,
};
use crate::request::ScrapeConfig;

/// Turns a URL into a normalized page capture.
pub trait Renderer: Send + Sync + Clone {
    fn render(
        &self,
        url: &str,
        config: &ScrapeConfig,
    ) -> impl Future<Output = Result<RenderCapture, AppError>> + Send;
}

/// A chat-style completion endpoint used by the extraction stage.
pub trait LanguageModel: Send + Sync + Clone {
    /// Provider label for logs and status reporting.
    fn name(&self) -> &str;

    fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns page HTML into structured data.
///
/// Never fails: any backend or parse problem degrades to `None` / empty.
pub trait Extractor: Send + Sync + Clone {
    /// Whether at least one backend is available.
    fn is_configured(&self) -> bool;

    /// Labels of the configured backends, in the order they are tried.
    fn providers(&self) -> Vec<String>;

    fn extract_by_schema(
        &self,
        html: &str,
        schema: &serde_json::Value,
    ) -> impl Future<Output = Option<serde_json::Value>> + Send;

    fn extract_by_prompt(
        &self,
        html: &str,
        prompt: &str,
    ) -> impl Future<Output = Option<PromptExtraction>> + Send;

    fn detect_extractable(
        &self,
        html: &str,
    ) -> impl Future<Output = Vec<ExtractionSuggestion>> + Send;
}

/// Credit balances per user.
pub trait AccountLedger: Send + Sync + Clone {
    /// Current balance. Negative means unlimited.
    fn get_balance(&self, user_id: Uuid) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Atomically subtract `amount`, failing with
    /// [`AppError::InsufficientCredits`] instead of going below zero.
    /// Returns the remaining balance.
    fn deduct(
        &self,
        user_id: Uuid,
        amount: i64,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Resolves a presented credential to a caller.
pub trait IdentityProvider: Send + Sync + Clone {
    fn authenticate(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<Identity, AppError>> + Send;
}

/// Durable job records.
///
/// Every status-changing method is conditional on the current status, so a
/// concurrent cancel and claim cannot both win.
pub trait JobStore: Send + Sync + Clone {
    fn create(&self, job: NewJob) -> impl Future<Output = Result<Job, AppError>> + Send;

    fn get(&self, job_id: Uuid) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    fn list(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// pending → processing. Returns false if the job was not pending.
    fn mark_processing(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn set_progress(
        &self,
        job_id: Uuid,
        progress: u8,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn record_retry(
        &self,
        job_id: Uuid,
        retries: u32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// processing → completed. Returns false if the job was not processing.
    fn complete(
        &self,
        job_id: Uuid,
        completion: JobCompletion,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// pending|processing → failed. Returns false if the job was already
    /// terminal.
    fn fail(
        &self,
        job_id: Uuid,
        error: JobError,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// pending → failed(CANCELLED). Returns false if the job was not pending.
    fn cancel(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Delete jobs created before `cutoff`. Returns the number removed.
    fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Durable result records, at most one per job.
pub trait ResultStore: Send + Sync + Clone {
    /// Insert a result. If one already exists for the job, its id is returned
    /// and nothing is written.
    fn save(
        &self,
        result: NewScrapeResult,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn get(
        &self,
        result_id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeResult>, AppError>> + Send;

    fn find_by_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<Uuid>, AppError>> + Send;

    fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// The set of durable collaborators the pipeline needs.
pub trait Storage: Send + Sync + Clone + 'static {
    type Jobs: JobStore + 'static;
    type Results: ResultStore + 'static;
    type Queue: JobQueue + 'static;
    type Ledger: AccountLedger + 'static;

    fn jobs(&self) -> &Self::Jobs;
    fn results(&self) -> &Self::Results;
    fn queue(&self) -> &Self::Queue;
    fn ledger(&self) -> &Self::Ledger;

    /// Deduct `credits` from the owner and record them on the job as one
    /// unit: both happen or neither does. Returns the owner's remaining
    /// balance, or `None` if the job was already charged.
    fn charge_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
        credits: i64,
    ) -> impl Future<Output = Result<Option<i64>, AppError>> + Send;
}
