use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::request::ScrapeConfig;

pub const CANCELLED_CODE: &str = "CANCELLED";
pub const CANCELLED_MESSAGE: &str = "Job cancelled by user";

/// Lifecycle status of a job. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal transitions: pending → processing → {completed, failed}, plus
    /// pending → failed for cancellation.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Coarse progress reported for a job that just entered this status.
    pub fn initial_progress(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 10,
            JobStatus::Completed | JobStatus::Failed => 100,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Structured error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn cancelled() -> Self {
        Self {
            code: CANCELLED_CODE.to_string(),
            message: CANCELLED_MESSAGE.to_string(),
        }
    }
}

impl From<&AppError> for JobError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.job_failure_code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds from queued to terminal.
    pub duration_ms: Option<u64>,
    pub credits_used: i64,
    pub retries: u32,
}

impl JobMetrics {
    pub fn queued(at: DateTime<Utc>) -> Self {
        Self {
            queued_at: at,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            credits_used: 0,
            retries: 0,
        }
    }
}

/// Milliseconds elapsed between two instants, clamped at zero.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// One asynchronous unit of scrape work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub credential_id: Uuid,
    pub url: String,
    pub config: ScrapeConfig,
    pub status: JobStatus,
    pub progress: u8,
    pub result_id: Option<Uuid>,
    pub error: Option<JobError>,
    pub metrics: JobMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed
            && self.error.as_ref().is_some_and(|e| e.code == CANCELLED_CODE)
    }

    /// Whether a charge was already recorded by an earlier delivery.
    pub fn is_charged(&self) -> bool {
        self.metrics.credits_used > 0
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: Uuid,
    pub credential_id: Uuid,
    pub url: String,
    pub config: ScrapeConfig,
}

/// Terminal success data written by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCompletion {
    pub result_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Retry policy with exponential backoff for queued jobs.
///
/// Attempt `n` (1-indexed) that fails is retried after
/// `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        delay.min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Prefix for the per-slot worker ids (`{prefix}-{n}`).
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    /// Upper bound on one attempt of one job, end to end.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            concurrency: 3,
            poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            job_timeout: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}
