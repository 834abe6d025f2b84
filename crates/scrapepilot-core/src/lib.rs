pub mod error;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod orchestrator;
pub mod reaper;
pub mod request;
pub mod scrape;
pub mod settings;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::AppError;
pub use job::{Job, JobError, JobStatus, RetryPolicy, WorkerConfig};
pub use job_queue::{JobQueue, QueueEntry};
pub use models::{
    ExtractionFormat, ExtractionOutput, ExtractionSuggestion, Identity, Permission,
    PromptExtraction, RenderCapture, RenderStrategy, ScrapeOutput, ScrapeResult, compute_hash,
};
pub use orchestrator::{Orchestrator, calculate_credits, select_strategy};
pub use request::{BrowserAction, ScrapeConfig};
pub use scrape::{DetectOutput, ScrapeService};
pub use settings::PipelineSettings;
pub use traits::{
    AccountLedger, Extractor, IdentityProvider, JobStore, LanguageModel, Renderer, ResultStore,
    Storage,
};
pub use worker::{TracingWorkerReporter, WorkerPool, WorkerService};
