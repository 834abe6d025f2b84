use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::job::{RetryPolicy, WorkerConfig};
use crate::request::{MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

/// Tunables for the job pipeline, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub worker_concurrency: usize,
    /// Default request timeout applied by the CLI when none is given.
    pub scrape_timeout_ms: u64,
    pub job_max_attempts: u32,
    pub job_backoff: Duration,
    pub job_timeout: Duration,
    /// Deadline for the extraction stage of one scrape.
    pub extraction_timeout: Duration,
    pub poll_interval: Duration,
    pub job_retention_days: i64,
    pub result_retention_days: i64,
    pub reaper_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 3,
            scrape_timeout_ms: 30_000,
            job_max_attempts: 3,
            job_backoff: Duration::from_millis(1_000),
            job_timeout: Duration::from_millis(300_000),
            extraction_timeout: Duration::from_millis(60_000),
            poll_interval: Duration::from_millis(1_000),
            job_retention_days: 30,
            result_retention_days: 7,
            reaper_interval: Duration::from_secs(3_600),
        }
    }
}

impl PipelineSettings {
    /// Read settings from environment variables, falling back to defaults.
    ///
    /// - `WORKER_CONCURRENCY` (3)
    /// - `SCRAPE_TIMEOUT` (30000 ms)
    /// - `JOB_MAX_ATTEMPTS` (3)
    /// - `JOB_BACKOFF_MS` (1000)
    /// - `JOB_TIMEOUT_MS` (300000)
    /// - `EXTRACTION_TIMEOUT_MS` (60000)
    /// - `WORKER_POLL_INTERVAL_MS` (1000)
    /// - `JOB_RETENTION_DAYS` (30)
    /// - `RESULT_RETENTION_DAYS` (7)
    /// - `REAPER_INTERVAL_SECS` (3600)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let worker_concurrency: usize =
            positive(&lookup, "WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        let scrape_timeout_ms: u64 =
            positive(&lookup, "SCRAPE_TIMEOUT", defaults.scrape_timeout_ms)?;
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&scrape_timeout_ms) {
            return Err(AppError::ConfigError(format!(
                "SCRAPE_TIMEOUT must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} ms"
            )));
        }

        Ok(Self {
            worker_concurrency,
            scrape_timeout_ms,
            job_max_attempts: positive(&lookup, "JOB_MAX_ATTEMPTS", defaults.job_max_attempts)?,
            job_backoff: Duration::from_millis(positive(&lookup, "JOB_BACKOFF_MS", 1_000)?),
            job_timeout: Duration::from_millis(positive(&lookup, "JOB_TIMEOUT_MS", 300_000)?),
            extraction_timeout: Duration::from_millis(positive(
                &lookup,
                "EXTRACTION_TIMEOUT_MS",
                60_000,
            )?),
            poll_interval: Duration::from_millis(positive(
                &lookup,
                "WORKER_POLL_INTERVAL_MS",
                1_000,
            )?),
            job_retention_days: positive(
                &lookup,
                "JOB_RETENTION_DAYS",
                defaults.job_retention_days,
            )?,
            result_retention_days: positive(
                &lookup,
                "RESULT_RETENTION_DAYS",
                defaults.result_retention_days,
            )?,
            reaper_interval: Duration::from_secs(positive(
                &lookup,
                "REAPER_INTERVAL_SECS",
                3_600,
            )?),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.job_max_attempts)
            .with_base_delay(self.job_backoff)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(self.worker_concurrency)
            .with_poll_interval(self.poll_interval)
            .with_retry_policy(self.retry_policy())
            .with_job_timeout(self.job_timeout)
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let parsed: T = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
    })?;
    if parsed <= T::default() {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(parsed)
}
