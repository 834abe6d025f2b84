use scrapepilot_client::{
    BrowserRenderer, BrowserSession, HttpRenderer, LlmConfig, LlmExtractor, OpenAiBackend,
};
use scrapepilot_core::error::AppError;
use scrapepilot_core::{Orchestrator, PipelineSettings, ScrapeService};
use scrapepilot_db::Database;

/// The pipeline as the server runs it: real renderers, OpenAI-compatible
/// extraction and PostgreSQL storage.
pub type PipelineService =
    ScrapeService<HttpRenderer, BrowserRenderer, LlmExtractor<OpenAiBackend>, Database>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub service: PipelineService,
    /// Applied to requests that do not set `timeout`.
    pub default_timeout_ms: u64,
}

impl AppState {
    pub fn new(
        db: Database,
        session: BrowserSession,
        llm: &LlmConfig,
        settings: &PipelineSettings,
    ) -> Result<Self, AppError> {
        let orchestrator = Orchestrator::new(HttpRenderer::new()?, BrowserRenderer::new(session));
        let extractor = LlmExtractor::from_config(llm)?;
        let service = ScrapeService::new(orchestrator, extractor, db.clone())
            .with_retry_policy(settings.retry_policy())
            .with_extraction_timeout(settings.extraction_timeout);

        Ok(Self {
            db,
            service,
            default_timeout_ms: settings.scrape_timeout_ms,
        })
    }
}
