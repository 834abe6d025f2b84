use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scrapepilot_client::{BrowserSession, BrowserSettings, LlmConfig};
use scrapepilot_core::PipelineSettings;
use scrapepilot_db::{Database, DatabaseConfig};
use scrapepilot_server::routes;
use scrapepilot_server::state::AppState;

/// Bodies carry schemas and action scripts, never uploads.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrapepilot=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("SCRAPEPILOT_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let settings = PipelineSettings::from_env()?;
    let llm = LlmConfig::from_env()?;
    let session = BrowserSession::new(BrowserSettings::from_env()?);

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    if llm.is_empty() {
        tracing::warn!("No extraction backend configured; extraction requests will return no data");
    }

    let state = Arc::new(AppState::new(db, session.clone(), &llm, &settings)?);

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
