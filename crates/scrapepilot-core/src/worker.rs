use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobCompletion, JobError, JobStatus, RetryPolicy, WorkerConfig, elapsed_ms};
use crate::job_queue::{JobQueue, QueueEntry};
use crate::models::NewScrapeResult;
use crate::orchestrator::calculate_credits;
use crate::scrape::ScrapeService;
use crate::traits::{Extractor, JobStore, Renderer, ResultStore, Storage};

pub const PROGRESS_RENDERED: u8 = 50;
pub const PROGRESS_EXTRACTED: u8 = 80;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    JobClaimed {
        entry: &'a QueueEntry,
    },
    JobStarted {
        job_id: Uuid,
        url: &'a str,
        attempt: u32,
    },
    JobCompleted {
        job_id: Uuid,
        result_id: Uuid,
        duration_ms: u64,
    },
    JobRetrying {
        job_id: Uuid,
        attempt: u32,
        error: &'a str,
        retry_at: DateTime<Utc>,
    },
    JobFailed {
        job_id: Uuid,
        code: &'a str,
        error: &'a str,
    },
    /// Claimed but not run: missing, already terminal, or cancelled first.
    JobSkipped {
        job_id: Uuid,
        reason: &'a str,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::JobClaimed { entry } => {
                tracing::info!(job_id = %entry.job_id, attempt = entry.attempt, "Job claimed");
            }
            WorkerEvent::JobStarted {
                job_id,
                url,
                attempt,
            } => {
                tracing::info!(%job_id, %url, attempt, "Processing job");
            }
            WorkerEvent::JobCompleted {
                job_id,
                result_id,
                duration_ms,
            } => {
                tracing::info!(%job_id, %result_id, duration_ms, "Job completed");
            }
            WorkerEvent::JobRetrying {
                job_id,
                attempt,
                error,
                retry_at,
            } => {
                tracing::warn!(%job_id, attempt, %error, %retry_at, "Job attempt failed, will retry");
            }
            WorkerEvent::JobFailed {
                job_id,
                code,
                error,
            } => {
                tracing::warn!(%job_id, %code, %error, "Job failed");
            }
            WorkerEvent::JobSkipped { job_id, reason } => {
                tracing::info!(%job_id, %reason, "Job skipped");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// One pool slot: claims queue entries and runs them to a terminal state or
/// a scheduled retry, one at a time.
pub struct WorkerService<H, B, X, S>
where
    H: Renderer,
    B: Renderer,
    X: Extractor,
    S: Storage,
{
    service: ScrapeService<H, B, X, S>,
    config: WorkerConfig,
}

impl<H, B, X, S> WorkerService<H, B, X, S>
where
    H: Renderer,
    B: Renderer,
    X: Extractor,
    S: Storage,
{
    pub fn new(service: ScrapeService<H, B, X, S>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            match self.poll_once(reporter).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: hand claimed entries back without using an attempt
        let released = self
            .service
            .storage()
            .queue()
            .release_worker(&self.config.worker_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(worker_id = %self.config.worker_id, error = %e, "Failed to release claimed jobs");
                0
            });

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Claim and process at most one entry. Returns whether one was claimed.
    pub async fn poll_once<WR: WorkerReporter>(&self, reporter: &WR) -> Result<bool, AppError> {
        reporter.report(WorkerEvent::Polling);

        let Some(entry) = self
            .service
            .storage()
            .queue()
            .claim(&self.config.worker_id)
            .await?
        else {
            return Ok(false);
        };

        reporter.report(WorkerEvent::JobClaimed { entry: &entry });
        self.process_entry(&entry, reporter).await;
        Ok(true)
    }

    async fn process_entry<WR: WorkerReporter>(&self, entry: &QueueEntry, reporter: &WR) {
        let storage = self.service.storage();

        let job = match storage.jobs().get(entry.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.skip(entry.job_id, "job no longer exists", reporter)
                    .await;
                return;
            }
            Err(e) => {
                // Left claimed; the visibility timeout hands it out again.
                tracing::error!(job_id = %entry.job_id, error = %e, "Failed to load job");
                return;
            }
        };

        if job.status.is_terminal() {
            let reason = if job.is_cancelled() {
                "cancelled before start"
            } else {
                "already terminal"
            };
            self.skip(job.id, reason, reporter).await;
            return;
        }

        if job.status.can_transition_to(JobStatus::Processing) {
            match storage.jobs().mark_processing(job.id, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => {
                    self.skip(job.id, "cancelled before start", reporter).await;
                    return;
                }
                Err(e) => {
                    self.handle_failure(entry, &job, e, reporter).await;
                    return;
                }
            }
        }

        if entry.attempt > 1
            && let Err(e) = storage.jobs().record_retry(job.id, entry.attempt - 1).await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to record retry count");
        }

        reporter.report(WorkerEvent::JobStarted {
            job_id: job.id,
            url: &job.url,
            attempt: entry.attempt,
        });

        match self.execute(&job).await {
            Ok(result_id) => self.finish(&job, result_id, reporter).await,
            Err(e) => self.handle_failure(entry, &job, e, reporter).await,
        }
    }

    /// Everything one attempt does before the job can be marked completed.
    /// Returns the id of the persisted result.
    ///
    /// The charge is the last fallible step, so an attempt that fails
    /// anywhere earlier costs nothing.
    async fn execute(&self, job: &Job) -> Result<Uuid, AppError> {
        let storage = self.service.storage();
        let credits = calculate_credits(&job.config);

        // A redelivered job whose result already landed is the same unit of work.
        let result_id = match storage.results().find_by_job(job.id).await? {
            Some(result_id) => {
                tracing::info!(job_id = %job.id, %result_id, "Reusing existing result");
                result_id
            }
            None => {
                if !job.is_charged() {
                    self.service.ensure_balance(job.owner_id, credits).await?;
                }
                self.produce_result(job).await?
            }
        };

        match storage.charge_job(job.id, job.owner_id, credits).await? {
            Some(remaining) => {
                tracing::info!(job_id = %job.id, credits, remaining, "Job charged");
            }
            None => tracing::debug!(job_id = %job.id, "Job was already charged"),
        }
        Ok(result_id)
    }

    /// Render, extract and save. `job_timeout` bounds the render; extraction
    /// gets whatever budget is left, capped by the extraction timeout, and
    /// degrades to absent output when it runs out.
    async fn produce_result(&self, job: &Job) -> Result<Uuid, AppError> {
        let storage = self.service.storage();
        let budget = self.config.job_timeout;
        let job_deadline = Instant::now() + budget;

        let capture = tokio::time::timeout_at(
            job_deadline,
            self.service.orchestrator().scrape(&job.url, &job.config),
        )
        .await
        .map_err(|_| AppError::Timeout(budget.as_millis() as u64))??;
        storage.jobs().set_progress(job.id, PROGRESS_RENDERED).await?;

        let extraction_deadline =
            job_deadline.min(Instant::now() + self.service.extraction_timeout());
        let extraction = self
            .service
            .run_extraction_until(&capture.html, &job.config, extraction_deadline)
            .await;
        storage
            .jobs()
            .set_progress(job.id, PROGRESS_EXTRACTED)
            .await?;

        let result = NewScrapeResult::from_capture(job.id, job.owner_id, capture, extraction);
        storage.results().save(result).await
    }

    async fn finish<WR: WorkerReporter>(&self, job: &Job, result_id: Uuid, reporter: &WR) {
        let storage = self.service.storage();
        let completed_at = Utc::now();
        let duration_ms = elapsed_ms(job.metrics.queued_at, completed_at);

        let completion = JobCompletion {
            result_id,
            completed_at,
            duration_ms,
        };
        match storage.jobs().complete(job.id, completion).await {
            Ok(true) => {
                reporter.report(WorkerEvent::JobCompleted {
                    job_id: job.id,
                    result_id,
                    duration_ms,
                });
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Job left processing before completion");
            }
            Err(e) => {
                // Entry stays claimed; redelivery will reuse the saved result.
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                return;
            }
        }

        self.ack(job.id).await;
    }

    async fn handle_failure<WR: WorkerReporter>(
        &self,
        entry: &QueueEntry,
        job: &Job,
        error: AppError,
        reporter: &WR,
    ) {
        let storage = self.service.storage();
        let message = error.to_string();

        let policy = RetryPolicy {
            max_attempts: entry.max_attempts,
            ..self.config.retry_policy
        };
        if policy.should_retry(entry.attempt, &error) {
            let delay = policy.delay_for_attempt(entry.attempt);
            let retry_at = Utc::now()
                + chrono::TimeDelta::from_std(delay).unwrap_or(chrono::TimeDelta::zero());

            reporter.report(WorkerEvent::JobRetrying {
                job_id: job.id,
                attempt: entry.attempt,
                error: &message,
                retry_at,
            });
            if let Err(e) = storage.queue().retry(job.id, retry_at).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to schedule retry");
            }
            return;
        }

        let job_error = JobError::from(&error);
        let completed_at = Utc::now();
        let duration_ms = elapsed_ms(job.metrics.queued_at, completed_at);

        reporter.report(WorkerEvent::JobFailed {
            job_id: job.id,
            code: &job_error.code,
            error: &message,
        });

        if let Err(e) = storage
            .jobs()
            .fail(job.id, job_error.clone(), completed_at, duration_ms)
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
            return;
        }
        self.ack(job.id).await;
    }

    async fn skip<WR: WorkerReporter>(&self, job_id: Uuid, reason: &str, reporter: &WR) {
        reporter.report(WorkerEvent::JobSkipped { job_id, reason });
        self.ack(job_id).await;
    }

    async fn ack(&self, job_id: Uuid) {
        if let Err(e) = self.service.storage().queue().ack(job_id).await {
            tracing::error!(%job_id, error = %e, "Failed to ack queue entry");
        }
    }
}

/// Runs `concurrency` worker slots over one shared service until cancelled.
pub struct WorkerPool<H, B, X, S>
where
    H: Renderer,
    B: Renderer,
    X: Extractor,
    S: Storage,
{
    service: ScrapeService<H, B, X, S>,
    config: WorkerConfig,
}

impl<H, B, X, S> WorkerPool<H, B, X, S>
where
    H: Renderer + 'static,
    B: Renderer + 'static,
    X: Extractor + 'static,
    S: Storage,
{
    pub fn new(service: ScrapeService<H, B, X, S>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    /// Slot ids, `{prefix}-{n}` for n in `1..=concurrency`.
    pub fn worker_ids(&self) -> Vec<String> {
        (1..=self.config.concurrency.max(1))
            .map(|n| format!("{}-{n}", self.config.worker_id))
            .collect()
    }

    /// Spawn every slot and wait for all of them to stop.
    pub async fn run<WR>(&self, cancel_token: CancellationToken, reporter: WR) -> Result<(), AppError>
    where
        WR: WorkerReporter + Clone + 'static,
    {
        match self.service.storage().queue().depth().await {
            Ok(depth) => tracing::info!(depth, "Queue depth at pool start"),
            Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
        }

        let mut slots = JoinSet::new();

        for worker_id in self.worker_ids() {
            let worker = WorkerService::new(
                self.service.clone(),
                self.config.clone().with_worker_id(worker_id),
            );
            let cancel = cancel_token.clone();
            let reporter = reporter.clone();
            slots.spawn(async move { worker.run(cancel, &reporter).await });
        }

        tracing::info!(slots = slots.len(), "Worker pool running");

        while let Some(joined) = slots.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker slot exited with error"),
                Err(e) => tracing::error!(error = %e, "Worker slot panicked"),
            }
        }

        tracing::info!("Worker pool stopped");
        Ok(())
    }
}
