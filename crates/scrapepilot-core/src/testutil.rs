//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobCompletion, JobError, JobMetrics, JobStatus, NewJob, elapsed_ms};
use crate::job_queue::{JobQueue, QueueEntry};
use crate::models::{
    ExtractionSuggestion, Identity, NewScrapeResult, PageMetadata, Permission, PromptExtraction,
    RenderCapture, RenderStrategy, ScrapeResult, Timing,
};
use crate::request::ScrapeConfig;
use crate::traits::{
    AccountLedger, Extractor, JobStore, Renderer, ResultStore, Storage,
};
use crate::worker::{WorkerEvent, WorkerReporter};

pub const TEST_HTML: &str = "<html lang=\"en\"><head><title>Example Domain</title></head>\
<body><h1>Example Domain</h1><p>This domain is for use in examples.</p></body></html>";

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// Mock renderer that pops queued responses, then falls back to a default
/// capture tagged with its strategy.
#[derive(Clone)]
pub struct MockRenderer {
    strategy: RenderStrategy,
    responses: Arc<Mutex<Vec<Result<RenderCapture, AppError>>>>,
    calls: Arc<Mutex<usize>>,
    delay: Option<Duration>,
}

impl MockRenderer {
    pub fn http() -> Self {
        Self::with_responses(RenderStrategy::Http, Vec::new())
    }

    pub fn browser() -> Self {
        Self::with_responses(RenderStrategy::Browser, Vec::new())
    }

    /// HTTP renderer whose first call fails.
    pub fn failing(error: AppError) -> Self {
        Self::with_responses(RenderStrategy::Http, vec![Err(error)])
    }

    pub fn with_responses(
        strategy: RenderStrategy,
        responses: Vec<Result<RenderCapture, AppError>>,
    ) -> Self {
        Self {
            strategy,
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(0)),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Renderer for MockRenderer {
    async fn render(&self, url: &str, _config: &ScrapeConfig) -> Result<RenderCapture, AppError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        next.unwrap_or_else(|| Ok(make_capture(self.strategy, url)))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor with fixed answers. Unconfigured mocks answer nothing.
#[derive(Clone, Default)]
pub struct MockExtractor {
    configured: bool,
    schema_data: Option<serde_json::Value>,
    prompt_result: Option<PromptExtraction>,
    suggestions: Vec<ExtractionSuggestion>,
    calls: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockExtractor {
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn configured() -> Self {
        Self {
            configured: true,
            ..Self::default()
        }
    }

    pub fn with_schema_data(mut self, data: serde_json::Value) -> Self {
        self.schema_data = Some(data);
        self
    }

    pub fn with_prompt_result(mut self, result: PromptExtraction) -> Self {
        self.prompt_result = Some(result);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<ExtractionSuggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Stall every extraction call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Extractor for MockExtractor {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn providers(&self) -> Vec<String> {
        if self.configured {
            vec!["mock".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn extract_by_schema(
        &self,
        _html: &str,
        _schema: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.record("schema").await;
        self.configured.then(|| self.schema_data.clone()).flatten()
    }

    async fn extract_by_prompt(&self, _html: &str, _prompt: &str) -> Option<PromptExtraction> {
        self.record("prompt").await;
        self.configured.then(|| self.prompt_result.clone()).flatten()
    }

    async fn detect_extractable(&self, _html: &str) -> Vec<ExtractionSuggestion> {
        self.record("detect").await;
        if self.configured {
            self.suggestions.clone()
        } else {
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory job store with the same conditional transitions as PostgreSQL.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl MemoryJobStore {
    /// All jobs in insertion order.
    pub fn all(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Insert a pending job with a backdated creation time.
    pub fn insert_at(
        &self,
        owner: &Identity,
        url: &str,
        config: ScrapeConfig,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let job = new_job(
            NewJob {
                owner_id: owner.user_id,
                credential_id: owner.credential_id,
                url: url.to_string(),
                config,
            },
            created_at,
        );
        let id = job.id;
        self.jobs.lock().unwrap().push(job);
        id
    }

    /// Apply `update` to a job whose status satisfies `when`.
    fn update_if(
        &self,
        job_id: Uuid,
        when: impl Fn(&Job) -> bool,
        update: impl FnOnce(&mut Job),
    ) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) if when(job) => {
                update(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

fn new_job(request: NewJob, created_at: DateTime<Utc>) -> Job {
    Job {
        id: Uuid::new_v4(),
        owner_id: request.owner_id,
        credential_id: request.credential_id,
        url: request.url,
        config: request.config,
        status: JobStatus::Pending,
        progress: JobStatus::Pending.initial_progress(),
        result_id: None,
        error: None,
        metrics: JobMetrics::queued(created_at),
        created_at,
        updated_at: created_at,
    }
}

fn finish(job: &mut Job, status: JobStatus, completed_at: DateTime<Utc>, duration_ms: u64) {
    job.status = status;
    job.progress = status.initial_progress();
    job.metrics.completed_at = Some(completed_at);
    job.metrics.duration_ms = Some(duration_ms);
}

impl JobStore for MemoryJobStore {
    async fn create(&self, request: NewJob) -> Result<Job, AppError> {
        let job = new_job(request, Utc::now());
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| j.owner_id == owner_id)
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processing(
        &self,
        job_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.update_if(
            job_id,
            |j| j.status == JobStatus::Pending,
            |j| {
                j.status = JobStatus::Processing;
                j.progress = JobStatus::Processing.initial_progress();
                j.metrics.started_at = Some(started_at);
            },
        ))
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) -> Result<(), AppError> {
        self.update_if(
            job_id,
            |j| j.status == JobStatus::Processing,
            |j| j.progress = progress.min(100),
        );
        Ok(())
    }

    async fn record_retry(&self, job_id: Uuid, retries: u32) -> Result<(), AppError> {
        self.update_if(job_id, |_| true, |j| j.metrics.retries = retries);
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, completion: JobCompletion) -> Result<bool, AppError> {
        Ok(self.update_if(
            job_id,
            |j| j.status == JobStatus::Processing,
            |j| {
                j.result_id = Some(completion.result_id);
                finish(
                    j,
                    JobStatus::Completed,
                    completion.completed_at,
                    completion.duration_ms,
                );
            },
        ))
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: JobError,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<bool, AppError> {
        Ok(self.update_if(
            job_id,
            |j| !j.status.is_terminal(),
            |j| {
                j.error = Some(error);
                finish(j, JobStatus::Failed, completed_at, duration_ms);
            },
        ))
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool, AppError> {
        let now = Utc::now();
        Ok(self.update_if(
            job_id,
            |j| j.status == JobStatus::Pending,
            |j| {
                j.error = Some(JobError::cancelled());
                let duration = elapsed_ms(j.metrics.queued_at, now);
                finish(j, JobStatus::Failed, now, duration);
            },
        ))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.created_at >= cutoff);
        Ok((before - jobs.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryResultStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryResultStore {
    results: Arc<Mutex<Vec<ScrapeResult>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MemoryResultStore {
    pub fn all(&self) -> Vec<ScrapeResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn fail_next_save(&self, error: AppError) {
        *self.save_error.lock().unwrap() = Some(error);
    }

    pub fn insert_at(&self, result: NewScrapeResult, created_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.results
            .lock()
            .unwrap()
            .push(result.into_result(id, created_at));
        id
    }
}

impl ResultStore for MemoryResultStore {
    async fn save(&self, result: NewScrapeResult) -> Result<Uuid, AppError> {
        if let Some(e) = self.save_error.lock().unwrap().take() {
            return Err(e);
        }
        let existing = self
            .results
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.job_id == result.job_id)
            .map(|r| r.id);
        match existing {
            Some(id) => Ok(id),
            None => Ok(self.insert_at(result, Utc::now())),
        }
    }

    async fn get(&self, result_id: Uuid) -> Result<Option<ScrapeResult>, AppError> {
        let results = self.results.lock().unwrap();
        Ok(results.iter().find(|r| r.id == result_id).cloned())
    }

    async fn find_by_job(&self, job_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let results = self.results.lock().unwrap();
        Ok(results.iter().find(|r| r.job_id == job_id).map(|r| r.id))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut results = self.results.lock().unwrap();
        let before = results.len();
        results.retain(|r| r.created_at >= cutoff);
        Ok((before - results.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// In-memory queue: one entry per job, earliest `available_at` first.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
    enqueue_error: Arc<Mutex<Option<AppError>>>,
    claim_error: Arc<Mutex<Option<AppError>>>,
    release_error: Arc<Mutex<Option<AppError>>>,
    released: Arc<Mutex<Vec<String>>>,
}

impl MemoryQueue {
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Worker ids that released their claims, in call order.
    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn fail_next_enqueue(&self, error: AppError) {
        *self.enqueue_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_claim(&self, error: AppError) {
        *self.claim_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_release(&self, error: AppError) {
        *self.release_error.lock().unwrap() = Some(error);
    }
}

impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job_id: Uuid, max_attempts: u32) -> Result<(), AppError> {
        if let Some(e) = self.enqueue_error.lock().unwrap().take() {
            return Err(e);
        }
        self.entries.lock().unwrap().push(QueueEntry {
            job_id,
            attempt: 0,
            max_attempts,
            available_at: Utc::now(),
            claimed_by: None,
        });
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<QueueEntry>, AppError> {
        if let Some(e) = self.claim_error.lock().unwrap().take() {
            return Err(e);
        }

        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let next = entries
            .iter_mut()
            .filter(|e| e.claimed_by.is_none() && e.available_at <= now)
            .min_by_key(|e| e.available_at);

        Ok(next.map(|entry| {
            entry.attempt += 1;
            entry.claimed_by = Some(worker_id.to_string());
            entry.clone()
        }))
    }

    async fn ack(&self, job_id: Uuid) -> Result<(), AppError> {
        self.entries.lock().unwrap().retain(|e| e.job_id != job_id);
        Ok(())
    }

    async fn retry(&self, job_id: Uuid, available_at: DateTime<Utc>) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.job_id == job_id) {
            entry.claimed_by = None;
            entry.available_at = available_at;
        }
        Ok(())
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64, AppError> {
        self.released.lock().unwrap().push(worker_id.to_string());
        if let Some(e) = self.release_error.lock().unwrap().take() {
            return Err(e);
        }

        let mut entries = self.entries.lock().unwrap();
        let mut count = 0u64;
        for entry in entries
            .iter_mut()
            .filter(|e| e.claimed_by.as_deref() == Some(worker_id))
        {
            entry.claimed_by = None;
            entry.attempt = entry.attempt.saturating_sub(1);
            count += 1;
        }
        Ok(count)
    }

    async fn depth(&self) -> Result<i64, AppError> {
        Ok(self.entries.lock().unwrap().len() as i64)
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// In-memory ledger. Unknown users have a zero balance.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    balances: Arc<Mutex<HashMap<Uuid, i64>>>,
    deductions: Arc<Mutex<Vec<(Uuid, i64)>>>,
}

impl MemoryLedger {
    pub fn set_balance(&self, user_id: Uuid, credits: i64) {
        self.balances.lock().unwrap().insert(user_id, credits);
    }

    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.balances
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Successful deductions: (user, amount).
    pub fn deductions(&self) -> Vec<(Uuid, i64)> {
        self.deductions.lock().unwrap().clone()
    }
}

impl AccountLedger for MemoryLedger {
    async fn get_balance(&self, user_id: Uuid) -> Result<i64, AppError> {
        Ok(self.balance(user_id))
    }

    async fn deduct(&self, user_id: Uuid, amount: i64) -> Result<i64, AppError> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user_id).or_insert(0);
        if *balance >= 0 {
            if *balance < amount {
                return Err(AppError::InsufficientCredits {
                    required: amount,
                    available: *balance,
                });
            }
            *balance -= amount;
        }
        self.deductions.lock().unwrap().push((user_id, amount));
        Ok(*balance)
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// All in-memory stores bundled as a [`Storage`].
#[derive(Clone, Default)]
pub struct MemoryStorage {
    pub jobs: MemoryJobStore,
    pub results: MemoryResultStore,
    pub queue: MemoryQueue,
    pub ledger: MemoryLedger,
    charge_failure: Arc<Mutex<Option<AppError>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `charge_job` fail with `error`, changing nothing.
    pub fn fail_next_charge(&self, error: AppError) {
        *self.charge_failure.lock().unwrap() = Some(error);
    }
}

impl Storage for MemoryStorage {
    type Jobs = MemoryJobStore;
    type Results = MemoryResultStore;
    type Queue = MemoryQueue;
    type Ledger = MemoryLedger;

    fn jobs(&self) -> &MemoryJobStore {
        &self.jobs
    }

    fn results(&self) -> &MemoryResultStore {
        &self.results
    }

    fn queue(&self) -> &MemoryQueue {
        &self.queue
    }

    fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    async fn charge_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
        credits: i64,
    ) -> Result<Option<i64>, AppError> {
        let failure = self.charge_failure.lock().unwrap().take();
        if let Some(error) = failure {
            return Err(error);
        }
        let charged = self.jobs.get(job_id).await?.is_some_and(|j| j.is_charged());
        if charged {
            return Ok(None);
        }

        let remaining = self.ledger.deduct(owner_id, credits).await?;
        self.jobs
            .update_if(job_id, |j| !j.is_charged(), |j| j.metrics.credits_used = credits);
        Ok(Some(remaining))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::JobClaimed { .. } => "JobClaimed",
            WorkerEvent::JobStarted { .. } => "JobStarted",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::JobRetrying { .. } => "JobRetrying",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::JobSkipped { .. } => "JobSkipped",
            WorkerEvent::ShuttingDown { .. } => "ShuttingDown",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Identity with the `scrape` permission.
pub fn make_identity() -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        credential_id: Uuid::new_v4(),
        permissions: vec![Permission::Scrape],
    }
}

/// A 200 capture of [`TEST_HTML`].
pub fn make_capture(strategy: RenderStrategy, url: &str) -> RenderCapture {
    RenderCapture {
        strategy,
        url: url.to_string(),
        final_url: url.to_string(),
        status_code: 200,
        headers: BTreeMap::from([("content-type".to_string(), "text/html".to_string())]),
        html: TEST_HTML.to_string(),
        text: "Example Domain This domain is for use in examples.".to_string(),
        metadata: PageMetadata {
            title: Some("Example Domain".to_string()),
            language: Some("en".to_string()),
            ..Default::default()
        },
        timing: Timing {
            load_time_ms: 12,
            render_time_ms: (strategy == RenderStrategy::Browser).then_some(5),
        },
        size: TEST_HTML.len() as u64,
        screenshot: None,
        pdf: None,
        action_results: None,
    }
}
