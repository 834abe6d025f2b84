use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// A delivery of one job to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: Uuid,
    /// 1-indexed attempt number of this delivery.
    pub attempt: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
}

impl QueueEntry {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Durable, at-least-once delivery queue with one entry per job.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent so two workers never hold the same entry. An entry stays in
/// the queue until acknowledged; a claim older than the visibility timeout is
/// handed out again.
pub trait JobQueue: Send + Sync + Clone {
    fn enqueue(
        &self,
        job_id: Uuid,
        max_attempts: u32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically claim the next available entry, incrementing its attempt.
    ///
    /// Returns `None` if nothing is available.
    fn claim(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<QueueEntry>, AppError>> + Send;

    /// Remove the entry; the job reached a terminal state or is gone.
    fn ack(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Release the claim and make the entry available again at `available_at`.
    fn retry(
        &self,
        job_id: Uuid,
        available_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Release every claim held by a worker without consuming an attempt
    /// (graceful shutdown).
    fn release_worker(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Number of entries waiting or in flight.
    fn depth(&self) -> impl Future<Output = Result<i64, AppError>> + Send;
}
