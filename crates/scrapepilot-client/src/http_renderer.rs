use std::collections::BTreeMap;
use std::time::Instant;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION,
    PROXY_AUTHORIZATION, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::{Client, Response, redirect};
use url::Url;
use scrapepilot_core::error::AppError;
use scrapepilot_core::models::{RenderCapture, RenderStrategy, Timing};
use scrapepilot_core::request::{ScrapeConfig, validate_target_url};
use scrapepilot_core::traits::Renderer;

use crate::guard::ensure_public_target;
use crate::page::PageView;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";
pub const MAX_REDIRECTS: usize = 10;

/// Plain HTTP render strategy: one GET, no script execution.
///
/// Redirects are followed here rather than by the client so every hop goes
/// through the same target checks as the first request.
///
/// SSRF protection is **enabled** by default. Use
/// [`allow_private_urls`](Self::allow_private_urls) for CLI usage where the
/// user controls the machine.
#[derive(Clone)]
pub struct HttpRenderer {
    client: Client,
    ssrf_protection: bool,
}

impl HttpRenderer {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    /// Gate for the initial target and every redirect hop.
    async fn admit(&self, url: &Url) -> Result<(), AppError> {
        if self.ssrf_protection {
            ensure_public_target(url).await?;
        }
        Ok(())
    }

    /// GET `target`, following redirects up to [`MAX_REDIRECTS`] hops.
    /// Returns the final response and the URL it came from.
    async fn fetch(
        &self,
        mut target: Url,
        mut headers: HeaderMap,
        config: &ScrapeConfig,
    ) -> Result<(Response, Url), AppError> {
        let origin = target.clone();
        let deadline = Instant::now() + config.timeout();
        let mut hops = 0;
        loop {
            let response = self
                .client
                .get(target.clone())
                .headers(headers.clone())
                .timeout(deadline.saturating_duration_since(Instant::now()))
                .send()
                .await
                .map_err(|e| transport_error(e, &origin, config.timeout_ms))?;

            let location = match response.headers().get(LOCATION) {
                Some(location) if response.status().is_redirection() => location.clone(),
                _ => return Ok((response, target)),
            };
            if hops == MAX_REDIRECTS {
                return Err(AppError::Navigation(format!(
                    "Too many redirects (more than {MAX_REDIRECTS}) from {origin}"
                )));
            }
            hops += 1;

            let next = redirect_target(&target, &location)?;
            self.admit(&next).await?;
            if next.host_str() != target.host_str() {
                for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION] {
                    headers.remove(name);
                }
            }
            tracing::debug!(from = %target, to = %next, "Following redirect");
            target = next;
        }
    }
}

fn transport_error(e: reqwest::Error, url: &Url, timeout_ms: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_ms)
    } else if e.is_connect() || e.is_redirect() {
        AppError::Navigation(format!("Failed to reach {url}: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

/// Resolve a `Location` header against the URL that returned it.
pub fn redirect_target(current: &Url, location: &HeaderValue) -> Result<Url, AppError> {
    let location = location
        .to_str()
        .map_err(|_| AppError::Navigation("Redirect location is not valid text".into()))?;
    let next = current
        .join(location)
        .map_err(|e| AppError::Navigation(format!("Invalid redirect location '{location}': {e}")))?;
    validate_target_url(next.as_str())
}

/// Browser-like default headers with the caller's headers layered on top.
/// Header names compare case-insensitively, so a caller `user-agent`
/// replaces the default `User-Agent`.
pub fn request_headers(config: &ScrapeConfig) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
    );
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

    if !config.cookies.is_empty() {
        let cookie = config
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Validation(format!("Invalid cookie value: {e}")))?;
        headers.insert(COOKIE, value);
    }

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::Validation(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::Validation(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

fn response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

impl Renderer for HttpRenderer {
    async fn render(&self, url: &str, config: &ScrapeConfig) -> Result<RenderCapture, AppError> {
        let target = validate_target_url(url)?;
        self.admit(&target).await?;
        let headers = request_headers(config)?;

        let start = Instant::now();
        tracing::debug!(url, "HTTP render started");

        // The deadline covers every hop, headers and the body.
        let (response, final_url) = self.fetch(target, headers, config).await?;

        let status_code = response.status().as_u16();
        let headers = response_headers(response.headers());
        let html = response
            .text()
            .await
            .map_err(|e| transport_error(e, &final_url, config.timeout_ms))?;
        let final_url = final_url.to_string();
        let load_time_ms = start.elapsed().as_millis() as u64;

        let view = PageView::derive(&html, &final_url);
        tracing::debug!(url, status_code, load_time_ms, size = html.len(), "HTTP render completed");

        Ok(RenderCapture {
            strategy: RenderStrategy::Http,
            url: url.to_string(),
            final_url,
            status_code,
            headers,
            size: html.len() as u64,
            text: view.text,
            metadata: view.metadata,
            html,
            timing: Timing {
                load_time_ms,
                render_time_ms: None,
            },
            screenshot: None,
            pdf: None,
            action_results: None,
        })
    }
}
