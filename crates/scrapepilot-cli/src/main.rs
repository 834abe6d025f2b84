use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scrapepilot_client::{
    BrowserRenderer, BrowserSession, BrowserSettings, HttpRenderer, LlmConfig, LlmExtractor,
};
use scrapepilot_core::reaper::{Reaper, RetentionPolicy};
use scrapepilot_core::request::{RenderMode, WaitStrategy, validate_target_url};
use scrapepilot_core::scrape::until_deadline;
use scrapepilot_core::traits::Extractor;
use scrapepilot_core::{
    Orchestrator, PipelineSettings, ScrapeConfig, ScrapeService, TracingWorkerReporter, WorkerPool,
    calculate_credits,
};
use scrapepilot_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "scrapepilot", version, about = "Web scraping with browser rendering and AI extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page and print the capture as JSON
    Scrape {
        #[command(flatten)]
        target: TargetArgs,

        /// Capture a PNG screenshot (browser only)
        #[arg(long, default_value_t = false)]
        screenshot: bool,

        /// Capture a PDF (browser only)
        #[arg(long, default_value_t = false)]
        pdf: bool,

        /// Path to a JSON Schema file; extracted data is shaped by it
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Natural-language extraction instruction
        #[arg(long)]
        prompt: Option<String>,

        /// Path to a JSON file holding a list of browser actions
        #[arg(long)]
        actions: Option<PathBuf>,

        /// Include the raw HTML in the output
        #[arg(long, default_value_t = false)]
        html: bool,
    },

    /// Render a page and ask the AI backend what could be extracted from it
    Detect {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Process queued jobs from PostgreSQL until Ctrl+C
    Worker {
        /// Number of concurrent worker slots
        #[arg(short, long, env = "WORKER_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Delete jobs and results past their retention windows, once
    Reap,
}

#[derive(Args)]
struct TargetArgs {
    /// Target URL to scrape
    #[arg(short, long)]
    url: String,

    /// auto, http or browser
    #[arg(long, default_value = "auto")]
    render_mode: RenderMode,

    /// load, domcontentloaded or networkidle
    #[arg(long, default_value = "load")]
    wait_for: WaitStrategy,

    /// CSS selector to wait for before capturing (browser only)
    #[arg(long)]
    selector: Option<String>,

    /// Render timeout in milliseconds (defaults to SCRAPE_TIMEOUT)
    #[arg(short, long)]
    timeout: Option<u64>,
}

impl TargetArgs {
    fn config(&self, settings: &PipelineSettings) -> ScrapeConfig {
        ScrapeConfig {
            render_mode: self.render_mode,
            wait_for: self.wait_for,
            wait_for_selector: self.selector.clone(),
            timeout_ms: self.timeout.unwrap_or(settings.scrape_timeout_ms),
            ..ScrapeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrapepilot=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = PipelineSettings::from_env()?;

    match cli.command {
        Commands::Scrape {
            target,
            screenshot,
            pdf,
            schema,
            prompt,
            actions,
            html,
        } => {
            let mut config = target.config(&settings);
            config.screenshot = screenshot;
            config.pdf = pdf;
            config.extract_prompt = prompt;
            if let Some(path) = schema {
                config.extract_schema = Some(read_json(&path)?);
            }
            if let Some(path) = actions {
                config.actions = serde_json::from_value(read_json(&path)?)
                    .with_context(|| format!("Invalid actions in {}", path.display()))?;
            }
            cmd_scrape(&target.url, config, html, &settings).await?;
        }
        Commands::Detect { target } => {
            let config = target.config(&settings);
            cmd_detect(&target.url, config, &settings).await?;
        }
        Commands::Worker { concurrency } => {
            let mut settings = settings;
            if let Some(n) = concurrency {
                settings.worker_concurrency = n.max(1);
            }
            cmd_worker(settings).await?;
        }
        Commands::Reap => {
            let db = connect_db().await?;
            let reaper = Reaper::new(
                db,
                RetentionPolicy::from_settings(&settings),
                settings.reaper_interval,
            );
            let report = reaper.run_once().await?;
            println!(
                "{}",
                serde_json::json!({
                    "jobsDeleted": report.jobs_deleted,
                    "resultsDeleted": report.results_deleted,
                })
            );
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Renderers for local use: loopback and private targets are allowed.
fn local_orchestrator(session: BrowserSession) -> Result<Orchestrator<HttpRenderer, BrowserRenderer>> {
    let http = HttpRenderer::new()?.allow_private_urls();
    let browser = BrowserRenderer::new(session).allow_private_urls();
    Ok(Orchestrator::new(http, browser))
}

async fn cmd_scrape(
    url: &str,
    config: ScrapeConfig,
    include_html: bool,
    settings: &PipelineSettings,
) -> Result<()> {
    validate_target_url(url)?;
    config.validate()?;

    let session = BrowserSession::new(BrowserSettings::from_env()?);
    let orchestrator = local_orchestrator(session.clone())?;
    let extractor = LlmExtractor::from_config(&LlmConfig::from_env()?)?;

    tracing::info!(
        url,
        strategy = %orchestrator.select_strategy(&config),
        "Scraping"
    );
    let outcome = orchestrator.scrape(url, &config).await;
    session.shutdown().await;
    let capture = outcome?;

    tracing::info!(
        status = capture.status_code,
        size = capture.size,
        load_time_ms = capture.timing.load_time_ms,
        "Page captured"
    );

    let deadline = Instant::now() + settings.extraction_timeout;
    let data = match &config.extract_schema {
        Some(schema) => until_deadline(
            deadline,
            "schema extraction",
            extractor.extract_by_schema(&capture.html, schema),
        )
        .await
        .flatten(),
        None => None,
    };
    let ai_extraction = match &config.extract_prompt {
        Some(prompt) => until_deadline(
            deadline,
            "prompt extraction",
            extractor.extract_by_prompt(&capture.html, prompt),
        )
        .await
        .flatten(),
        None => None,
    };
    if config.wants_extraction() && !extractor.is_configured() {
        tracing::warn!("No extraction backend configured; extraction skipped");
    }

    let mut output = serde_json::to_value(&capture)?;
    if let Some(fields) = output.as_object_mut() {
        if !include_html {
            fields.remove("html");
        }
        if let Some(data) = data {
            fields.insert("data".into(), data);
        }
        if let Some(ai) = ai_extraction {
            fields.insert("aiExtraction".into(), serde_json::to_value(ai)?);
        }
        fields.insert("credits".into(), calculate_credits(&config).into());
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_detect(url: &str, config: ScrapeConfig, settings: &PipelineSettings) -> Result<()> {
    validate_target_url(url)?;
    config.validate()?;

    let extractor = LlmExtractor::from_config(&LlmConfig::from_env()?)?;
    if !extractor.is_configured() {
        anyhow::bail!("No AI provider configured (set OPENAI_API_KEY, GROQ_API_KEY or OLLAMA_URL)");
    }

    let session = BrowserSession::new(BrowserSettings::from_env()?);
    let orchestrator = local_orchestrator(session.clone())?;
    let outcome = orchestrator.scrape(url, &config).await;
    session.shutdown().await;
    let capture = outcome?;

    let suggestions = until_deadline(
        Instant::now() + settings.extraction_timeout,
        "detection",
        extractor.detect_extractable(&capture.html),
    )
    .await
    .unwrap_or_default();
    tracing::info!(count = suggestions.len(), "Detection complete");

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "url": url,
            "suggestions": suggestions,
        }))?
    );
    Ok(())
}

async fn cmd_worker(settings: PipelineSettings) -> Result<()> {
    let db = connect_db().await?;
    let session = BrowserSession::new(BrowserSettings::from_env()?);
    let llm = LlmConfig::from_env()?;
    if llm.is_empty() {
        tracing::warn!("No extraction backend configured; extraction requests will return no data");
    }

    let orchestrator = Orchestrator::new(
        HttpRenderer::new()?,
        BrowserRenderer::new(session.clone()),
    );
    let service = ScrapeService::new(orchestrator, LlmExtractor::from_config(&llm)?, db.clone())
        .with_retry_policy(settings.retry_policy())
        .with_extraction_timeout(settings.extraction_timeout);
    let pool = WorkerPool::new(service, settings.worker_config());

    let cancel = CancellationToken::new();

    let reaper = Reaper::new(
        db,
        RetentionPolicy::from_settings(&settings),
        settings.reaper_interval,
    );
    let reaper_cancel = cancel.clone();
    let reaper_task = tokio::spawn(async move { reaper.run(reaper_cancel).await });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        tracing::info!("Shutdown signal received, finishing in-flight jobs");
        signal_cancel.cancel();
    });

    tracing::info!(
        concurrency = settings.worker_concurrency,
        workers = ?pool.worker_ids(),
        "Starting worker pool"
    );
    let result = pool.run(cancel.clone(), TracingWorkerReporter).await;

    cancel.cancel();
    if let Err(e) = reaper_task.await {
        tracing::error!("Reaper task failed: {e}");
    }
    session.shutdown().await;

    result?;
    Ok(())
}
