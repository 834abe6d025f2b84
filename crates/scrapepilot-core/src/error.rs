use thiserror::Error;

/// Application-wide error types for ScrapePilot.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request; rejected before any credit check.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller's balance does not cover the requested work.
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    /// Missing or invalid credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated, but the credential lacks the required permission.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancel requested for a job that is no longer pending.
    #[error("Job {0} cannot be cancelled in its current state")]
    NotCancellable(String),

    /// Result requested for a job that has not completed.
    #[error("Job {0} has not completed")]
    JobNotReady(String),

    /// Page navigation failed (DNS, connection, protocol).
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// An operation exceeded its time budget.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The headless browser could not be started or has been shut down.
    #[error("Browser unavailable: {0}")]
    BrowserLaunch(String),

    /// HTTP client error outside of page navigation.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Extraction backend call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// No extraction backend is configured.
    #[error("AI extraction is not configured")]
    ExtractionUnavailable,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if a queued job failing with this error should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Navigation(_)
            | AppError::Timeout(_)
            | AppError::BrowserLaunch(_)
            | AppError::NetworkError(_)
            | AppError::RateLimitExceeded
            | AppError::DatabaseError(_) => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Stable error code exposed to API callers and stored on failed jobs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::SerializationError(_) => "VALIDATION_ERROR",
            AppError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotCancellable(_) => "NOT_CANCELLABLE",
            AppError::JobNotReady(_) => "JOB_NOT_COMPLETED",
            AppError::Navigation(_) | AppError::HttpError(_) | AppError::NetworkError(_) => {
                "SCRAPE_FAILED"
            }
            AppError::Timeout(_) => "TIMEOUT",
            AppError::BrowserLaunch(_) => "BROWSER_UNAVAILABLE",
            AppError::ExtractionUnavailable => "AI_NOT_CONFIGURED",
            AppError::RateLimitExceeded => "RATE_LIMITED",
            AppError::LlmError { .. } | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Error code recorded on a job that failed terminally with this error.
    ///
    /// Render failures of any kind collapse into `SCRAPE_FAILED`; the browser
    /// being unavailable stays distinct as an infrastructure fault.
    pub fn job_failure_code(&self) -> &'static str {
        match self {
            AppError::Navigation(_)
            | AppError::Timeout(_)
            | AppError::HttpError(_)
            | AppError::NetworkError(_) => "SCRAPE_FAILED",
            other => other.code(),
        }
    }
}
