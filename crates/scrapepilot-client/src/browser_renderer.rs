use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventResponseReceived, Headers, ResourceType, SetCookiesParams,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, PrintToPdfParams,
    SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use scrapepilot_core::error::AppError;
use scrapepilot_core::models::{ActionResult, RenderCapture, RenderStrategy, Timing};
use scrapepilot_core::request::{
    BrowserAction, ScrapeConfig, ScrollDirection, WaitStrategy, validate_target_url,
};
use scrapepilot_core::traits::Renderer;
use tokio::time::Instant;
use url::Url;

use crate::browser::{BrowserLease, BrowserSession};
use crate::guard::ensure_public_target;
use crate::page::PageView;

const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_WAIT: Duration = Duration::from_secs(1);
/// How long to wait for the main document response after the page loaded.
const RESPONSE_GRACE: Duration = Duration::from_millis(500);
/// A4 in inches.
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;

/// Headless-browser render strategy on top of a shared [`BrowserSession`].
///
/// Every call gets its own browser context and page, both disposed on the
/// way out whatever the outcome. Only the browser process is shared.
#[derive(Clone)]
pub struct BrowserRenderer {
    session: BrowserSession,
    ssrf_protection: bool,
}

/// One render's browser context and page.
///
/// [`release`](Self::release) disposes both. If the render future is
/// dropped first (caller timeout, client disconnect) the scope is dropped
/// armed and hands the same cleanup to a background task.
struct RenderScope {
    browser: Option<BrowserLease>,
    context_id: BrowserContextId,
    page: Option<Page>,
}

impl RenderScope {
    async fn open(browser: BrowserLease) -> Result<Self, AppError> {
        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AppError::BrowserLaunch(format!("Failed to create browser context: {e}")))?
            .result
            .browser_context_id;

        Ok(Self {
            browser: Some(browser),
            context_id,
            page: None,
        })
    }

    async fn new_page(&mut self) -> Result<Page, AppError> {
        let Some(browser) = self.browser.as_ref() else {
            return Err(AppError::BrowserLaunch("Render scope already released".into()));
        };
        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = Some(self.context_id.clone());
        let page = browser
            .new_page(params)
            .await
            .map_err(|e| AppError::BrowserLaunch(format!("Failed to open page: {e}")))?;
        self.page = Some(page.clone());
        Ok(page)
    }

    async fn release(mut self) {
        if let Some(browser) = self.browser.take() {
            dispose(browser, self.context_id.clone(), self.page.take()).await;
        }
    }
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        let Some(browser) = self.browser.take() else {
            return;
        };
        let cleanup = dispose(browser, self.context_id.clone(), self.page.take());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Render abandoned, disposing its browser context in the background");
                handle.spawn(cleanup);
            }
            Err(_) => tracing::warn!("No runtime left to dispose an abandoned browser context"),
        }
    }
}

async fn dispose(browser: BrowserLease, context_id: BrowserContextId, page: Option<Page>) {
    if let Some(page) = page
        && let Err(e) = page.close().await
    {
        tracing::debug!("Failed to close page: {e}");
    }
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        tracing::warn!("Failed to dispose browser context: {e}");
    }
}

/// What a successful action hands back.
enum ActionOutput {
    Done,
    Value(Option<serde_json::Value>),
    Screenshot(String),
}

impl BrowserRenderer {
    pub fn new(session: BrowserSession) -> Self {
        Self {
            session,
            ssrf_protection: true,
        }
    }

    /// Disable SSRF protection for the navigation target.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    async fn drive(
        &self,
        page: &Page,
        url: &str,
        target: &Url,
        config: &ScrapeConfig,
    ) -> Result<RenderCapture, AppError> {
        let start = Instant::now();
        let deadline = start + config.timeout();

        page.execute(EnableParams::default())
            .await
            .map_err(cdp("Failed to enable network events"))?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(cdp("Failed to enable lifecycle events"))?;
        page.execute(SetExtraHttpHeadersParams::new(extra_headers(config)))
            .await
            .map_err(cdp("Failed to set request headers"))?;
        if !config.cookies.is_empty() {
            page.execute(SetCookiesParams::new(cookie_params(config, target)))
                .await
                .map_err(cdp("Failed to set cookies"))?;
        }

        // Subscribe before navigating so no event can be missed.
        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(cdp("Failed to subscribe to lifecycle events"))?;
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp("Failed to subscribe to network events"))?;
        let mut main_response = tokio::spawn(first_document_response(responses));

        let navigation = tokio::time::timeout_at(deadline, page.execute(NavigateParams::new(url)))
            .await
            .map_err(|_| navigation_timeout(config))?
            .map_err(|e| AppError::Navigation(format!("Failed to navigate to {url}: {e}")))?
            .result;
        if let Some(error) = navigation.error_text.filter(|e| !e.is_empty()) {
            main_response.abort();
            return Err(AppError::Navigation(format!("{error} at {url}")));
        }

        let wanted = lifecycle_event_name(config.wait_for);
        let reached = async {
            while let Some(event) = lifecycle.next().await {
                if event.frame_id == navigation.frame_id
                    && event.name == wanted
                    && navigation
                        .loader_id
                        .as_ref()
                        .is_none_or(|id| *id == event.loader_id)
                {
                    return true;
                }
            }
            false
        };
        match tokio::time::timeout_at(deadline, reached).await {
            Ok(true) => {}
            Ok(false) => {
                main_response.abort();
                return Err(AppError::Navigation(format!(
                    "Page closed before '{wanted}' at {url}"
                )));
            }
            Err(_) => {
                main_response.abort();
                return Err(navigation_timeout(config));
            }
        }

        if let Some(selector) = &config.wait_for_selector
            && tokio::time::timeout_at(deadline, wait_for_selector(page, selector))
                .await
                .is_err()
        {
            main_response.abort();
            return Err(AppError::Timeout(config.timeout_ms));
        }
        let load_time_ms = start.elapsed().as_millis() as u64;

        let (status_code, headers) =
            match tokio::time::timeout(RESPONSE_GRACE, &mut main_response).await {
                Ok(Ok(Some(response))) => response,
                _ => (200, BTreeMap::new()),
            };
        main_response.abort();

        let action_results = if config.actions.is_empty() {
            None
        } else {
            Some(self.run_actions(page, &config.actions).await)
        };

        let final_url = page
            .url()
            .await
            .map_err(cdp("Failed to read page URL"))?
            .unwrap_or_else(|| url.to_string());
        let html = page
            .content()
            .await
            .map_err(cdp("Failed to read page content"))?;
        let view = PageView::derive(&html, &final_url);

        let screenshot = if config.screenshot {
            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .build();
            let bytes = page
                .screenshot(params)
                .await
                .map_err(cdp("Page screenshot failed"))?;
            Some(data_url("image/png", &bytes))
        } else {
            None
        };

        let pdf = if config.pdf {
            let bytes = page
                .pdf(PrintToPdfParams {
                    print_background: Some(true),
                    paper_width: Some(A4_WIDTH_IN),
                    paper_height: Some(A4_HEIGHT_IN),
                    ..Default::default()
                })
                .await
                .map_err(cdp("PDF generation failed"))?;
            Some(data_url("application/pdf", &bytes))
        } else {
            None
        };

        let render_time_ms = (start.elapsed().as_millis() as u64).saturating_sub(load_time_ms);

        Ok(RenderCapture {
            strategy: RenderStrategy::Browser,
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
                render_time_ms: Some(render_time_ms),
            },
            screenshot,
            pdf,
            action_results,
        })
    }

    /// Run every action in order. A failing action is recorded and the
    /// sequence continues.
    async fn run_actions(&self, page: &Page, actions: &[BrowserAction]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());

        for (index, action) in actions.iter().enumerate() {
            let budget = self.action_budget(action);
            let started = Instant::now();
            let outcome = match tokio::time::timeout(budget, self.run_action(page, action)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(format!("timed out after {} ms", budget.as_millis())),
            };

            let mut result = ActionResult {
                index,
                action: action.kind().to_string(),
                success: outcome.is_ok(),
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
                output: None,
                screenshot: None,
            };
            match outcome {
                Ok(ActionOutput::Done) => {}
                Ok(ActionOutput::Value(value)) => result.output = value,
                Ok(ActionOutput::Screenshot(data)) => result.screenshot = Some(data),
                Err(error) => {
                    tracing::warn!(index, action = action.kind(), "Browser action failed: {error}");
                    result.error = Some(error);
                }
            }
            results.push(result);

            if let Some(pause) = action.wait_after() {
                tokio::time::sleep(pause).await;
            }
        }

        results
    }

    fn action_budget(&self, action: &BrowserAction) -> Duration {
        let default = self.session.settings().action_timeout;
        match action {
            BrowserAction::Wait {
                selector: Some(_),
                timeout,
            } => timeout.map(Duration::from_millis).unwrap_or(default),
            // A plain pause must never trip its own budget.
            BrowserAction::Wait {
                selector: None,
                timeout,
            } => timeout.map(Duration::from_millis).unwrap_or(DEFAULT_WAIT) + default,
            _ => default,
        }
    }

    async fn run_action(&self, page: &Page, action: &BrowserAction) -> Result<ActionOutput, String> {
        if action.runs_script() && !self.session.settings().allow_scripts {
            return Err("script execution is disabled".into());
        }
        match action {
            BrowserAction::Click { selector, .. } => {
                page.find_element(selector.as_str())
                    .await
                    .map_err(|e| format!("no element matches '{selector}': {e}"))?
                    .click()
                    .await
                    .map_err(|e| format!("click failed: {e}"))?;
                Ok(ActionOutput::Done)
            }
            BrowserAction::Scroll {
                direction, amount, ..
            } => {
                evaluate(page, &scroll_script(*direction, *amount)).await?;
                Ok(ActionOutput::Done)
            }
            BrowserAction::Fill {
                selector, value, ..
            } => {
                evaluate(page, &fill_script(selector, value)).await?;
                Ok(ActionOutput::Done)
            }
            BrowserAction::Execute { script, .. } => {
                let value = evaluate(page, &script_expression(script)).await?;
                Ok(ActionOutput::Value(value))
            }
            BrowserAction::Wait {
                selector: Some(selector),
                ..
            } => {
                wait_for_selector(page, selector).await;
                Ok(ActionOutput::Done)
            }
            BrowserAction::Wait {
                selector: None,
                timeout,
            } => {
                tokio::time::sleep(timeout.map(Duration::from_millis).unwrap_or(DEFAULT_WAIT))
                    .await;
                Ok(ActionOutput::Done)
            }
            BrowserAction::Screenshot {
                selector,
                full_page,
            } => {
                let bytes = match selector {
                    Some(selector) => page
                        .find_element(selector.as_str())
                        .await
                        .map_err(|e| format!("no element matches '{selector}': {e}"))?
                        .screenshot(CaptureScreenshotFormat::Png)
                        .await
                        .map_err(|e| format!("element screenshot failed: {e}"))?,
                    None => page
                        .screenshot(
                            ScreenshotParams::builder()
                                .format(CaptureScreenshotFormat::Png)
                                .full_page(*full_page)
                                .build(),
                        )
                        .await
                        .map_err(|e| format!("page screenshot failed: {e}"))?,
                };
                Ok(ActionOutput::Screenshot(data_url("image/png", &bytes)))
            }
        }
    }
}

impl Renderer for BrowserRenderer {
    async fn render(&self, url: &str, config: &ScrapeConfig) -> Result<RenderCapture, AppError> {
        let target = validate_target_url(url)?;
        if self.ssrf_protection {
            ensure_public_target(&target).await?;
        }

        let browser = self.session.lease().await?;
        tracing::debug!(url, wait_for = %config.wait_for, "Browser render started");

        let mut scope = RenderScope::open(browser).await?;
        let outcome = match scope.new_page().await {
            Ok(page) => self.drive(&page, url, &target, config).await,
            Err(e) => Err(e),
        };
        scope.release().await;

        match &outcome {
            Ok(capture) => tracing::debug!(
                url,
                status_code = capture.status_code,
                load_time_ms = capture.timing.load_time_ms,
                size = capture.size,
                "Browser render completed"
            ),
            Err(e) => tracing::debug!(url, "Browser render failed: {e}"),
        }
        outcome
    }
}

fn cdp<E: Display>(what: &'static str) -> impl FnOnce(E) -> AppError {
    move |e| AppError::Navigation(format!("{what}: {e}"))
}

fn navigation_timeout(config: &ScrapeConfig) -> AppError {
    AppError::Navigation(format!(
        "Navigation timeout of {} ms exceeded waiting for '{}'",
        config.timeout_ms,
        lifecycle_event_name(config.wait_for)
    ))
}

/// CDP lifecycle event that satisfies a wait strategy.
fn lifecycle_event_name(wait_for: WaitStrategy) -> &'static str {
    match wait_for {
        WaitStrategy::Load => "load",
        WaitStrategy::DomContentLoaded => "DOMContentLoaded",
        WaitStrategy::NetworkIdle => "networkIdle",
    }
}

/// Status and headers of the first document response, i.e. the top-level
/// navigation after any redirects.
async fn first_document_response(
    mut responses: EventStream<EventResponseReceived>,
) -> Option<(u16, BTreeMap<String, String>)> {
    while let Some(event) = responses.next().await {
        if event.r#type == ResourceType::Document {
            let status = u16::try_from(event.response.status).unwrap_or(200);
            return Some((status, header_map(&event.response.headers)));
        }
    }
    None
}

fn header_map(headers: &Headers) -> BTreeMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .as_str()
                        .map(|v| (name.to_lowercase(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `Accept-Language` default with the caller's headers layered on top,
/// names compared case-insensitively.
fn extra_headers(config: &ScrapeConfig) -> Headers {
    let mut headers = serde_json::Map::new();
    headers.insert(
        "Accept-Language".to_string(),
        serde_json::Value::from(BROWSER_ACCEPT_LANGUAGE),
    );
    for (name, value) in &config.headers {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), serde_json::Value::from(value.as_str()));
    }
    Headers::new(serde_json::Value::Object(headers))
}

/// Cookies default to the target host and path `/`.
fn cookie_params(config: &ScrapeConfig, target: &Url) -> Vec<CookieParam> {
    let host = target.host_str().unwrap_or_default();
    config
        .cookies
        .iter()
        .map(|cookie| {
            let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
            param.domain = Some(cookie.domain.clone().unwrap_or_else(|| host.to_string()));
            param.path = Some("/".to_string());
            param
        })
        .collect()
}

fn scroll_script(direction: ScrollDirection, amount: Option<i64>) -> String {
    let step = amount
        .map(|a| a.unsigned_abs().to_string())
        .unwrap_or_else(|| "window.innerHeight".to_string());
    match direction {
        ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
        ScrollDirection::Bottom => "window.scrollTo(0, document.body.scrollHeight)".to_string(),
        ScrollDirection::Up => format!("window.scrollBy(0, -({step}))"),
        ScrollDirection::Down => format!("window.scrollBy(0, {step})"),
    }
}

/// Replace the value of an input and fire the events frameworks listen for.
fn fill_script(selector: &str, value: &str) -> String {
    let selector = serde_json::Value::from(selector);
    let value = serde_json::Value::from(value);
    format!(
        "(() => {{ \
            const el = document.querySelector({selector}); \
            if (!el) throw new Error('no element matches ' + {selector}); \
            el.focus(); \
            el.value = {value}; \
            el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
            el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
        }})()"
    )
}

/// Scripts written as function bodies (`return ...`) run inside an async
/// wrapper; plain expressions are evaluated as-is.
fn script_expression(script: &str) -> String {
    let trimmed = script.trim();
    if trimmed.starts_with("return") || trimmed.contains("\nreturn") || trimmed.contains("; return")
    {
        format!("(async () => {{ {trimmed} \n}})()")
    } else {
        trimmed.to_string()
    }
}

async fn evaluate(page: &Page, expression: &str) -> Result<Option<serde_json::Value>, String> {
    let result = page
        .evaluate_expression(EvaluateParams::new(expression))
        .await
        .map_err(|e| format!("script failed: {e}"))?;
    Ok(result.value().cloned())
}

async fn wait_for_selector(page: &Page, selector: &str) {
    while page.find_element(selector).await.is_err() {
        tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}
