//! Render strategy selection and credit pricing.

use crate::error::AppError;
use crate::models::{RenderCapture, RenderStrategy};
use crate::request::{RenderMode, ScrapeConfig, WaitStrategy};
use crate::traits::Renderer;

/// Credit prices per feature.
pub mod credit_costs {
    pub const BASE: i64 = 1;
    pub const BROWSER: i64 = 1;
    pub const SCREENSHOT: i64 = 1;
    pub const PDF: i64 = 2;
    pub const EXTRACTION: i64 = 2;
    /// Flat price of an extraction-target detection call.
    pub const DETECT: i64 = 2;
}

/// Pick the render strategy for a request.
///
/// Browser whenever a feature needs a real rendering engine; HTTP otherwise.
pub fn select_strategy(config: &ScrapeConfig) -> RenderStrategy {
    let needs_browser = config.render_mode == RenderMode::Browser
        || config.screenshot
        || config.pdf
        || config.wait_for_selector.is_some()
        || config.wait_for == WaitStrategy::NetworkIdle
        || !config.actions.is_empty();

    if needs_browser {
        RenderStrategy::Browser
    } else {
        RenderStrategy::Http
    }
}

/// Price a request before doing any work.
pub fn calculate_credits(config: &ScrapeConfig) -> i64 {
    let mut credits = credit_costs::BASE;
    if select_strategy(config) == RenderStrategy::Browser {
        credits += credit_costs::BROWSER;
    }
    if config.screenshot {
        credits += credit_costs::SCREENSHOT;
    }
    if config.pdf {
        credits += credit_costs::PDF;
    }
    if config.wants_extraction() {
        credits += credit_costs::EXTRACTION;
    }
    credits
}

/// Routes a scrape to the HTTP or browser renderer.
///
/// Has no side effects beyond the chosen renderer; billing and persistence
/// belong to the caller.
#[derive(Clone)]
pub struct Orchestrator<H, B>
where
    H: Renderer,
    B: Renderer,
{
    http: H,
    browser: B,
}

impl<H, B> Orchestrator<H, B>
where
    H: Renderer,
    B: Renderer,
{
    pub fn new(http: H, browser: B) -> Self {
        Self { http, browser }
    }

    pub fn select_strategy(&self, config: &ScrapeConfig) -> RenderStrategy {
        select_strategy(config)
    }

    pub fn calculate_credits(&self, config: &ScrapeConfig) -> i64 {
        calculate_credits(config)
    }

    /// Render with the selected strategy. The whole render, actions and
    /// captures included, must finish within the request timeout.
    pub async fn scrape(&self, url: &str, config: &ScrapeConfig) -> Result<RenderCapture, AppError> {
        let strategy = select_strategy(config);
        tracing::info!(%url, %strategy, "Rendering page");

        let render = async {
            match strategy {
                RenderStrategy::Http => self.http.render(url, config).await,
                RenderStrategy::Browser => self.browser.render(url, config).await,
            }
        };
        let capture = tokio::time::timeout(config.timeout(), render)
            .await
            .map_err(|_| AppError::Timeout(config.timeout_ms))??;

        tracing::info!(
            %url,
            final_url = %capture.final_url,
            status = capture.status_code,
            bytes = capture.size,
            "Page rendered"
        );
        Ok(capture)
    }
}
