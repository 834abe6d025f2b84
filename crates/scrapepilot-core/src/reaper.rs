use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::settings::PipelineSettings;
use crate::traits::{JobStore, ResultStore, Storage};

/// How long jobs and results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub jobs: TimeDelta,
    pub results: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            jobs: TimeDelta::days(30),
            results: TimeDelta::days(7),
        }
    }
}

impl RetentionPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            jobs: TimeDelta::days(settings.job_retention_days),
            results: TimeDelta::days(settings.result_retention_days),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub jobs_deleted: u64,
    pub results_deleted: u64,
}

/// Deletes expired jobs and results.
pub struct Reaper<S: Storage> {
    storage: S,
    policy: RetentionPolicy,
    interval: Duration,
}

impl<S: Storage> Reaper<S> {
    pub fn new(storage: S, policy: RetentionPolicy, interval: Duration) -> Self {
        Self {
            storage,
            policy,
            interval,
        }
    }

    /// One retention pass: results first, then jobs.
    pub async fn run_once(&self) -> Result<ReapReport, AppError> {
        let now = Utc::now();

        let results_deleted = self
            .storage
            .results()
            .purge_older_than(now - self.policy.results)
            .await?;
        let jobs_deleted = self
            .storage
            .jobs()
            .purge_older_than(now - self.policy.jobs)
            .await?;

        tracing::info!(jobs_deleted, results_deleted, "Retention pass finished");
        Ok(ReapReport {
            jobs_deleted,
            results_deleted,
        })
    }

    /// Run a pass immediately, then every `interval`, until cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) {
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Retention pass failed");
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }
        tracing::info!("Reaper stopped");
    }
}
