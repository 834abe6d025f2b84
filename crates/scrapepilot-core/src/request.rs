use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
pub const MAX_ACTIONS: usize = 20;
pub const MAX_PROMPT_CHARS: usize = 2_000;

/// Requested render mode. `Auto` and `Http` both defer to the strategy rule;
/// only `Browser` forces a real rendering engine on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Auto,
    Http,
    Browser,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Auto => "auto",
            RenderMode::Http => "http",
            RenderMode::Browser => "browser",
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(RenderMode::Auto),
            "http" => Ok(RenderMode::Http),
            "browser" => Ok(RenderMode::Browser),
            _ => Err(format!("Unknown render mode: {s}")),
        }
    }
}

/// When a browser navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    #[default]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl WaitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStrategy::Load => "load",
            WaitStrategy::DomContentLoaded => "domcontentloaded",
            WaitStrategy::NetworkIdle => "networkidle",
        }
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(WaitStrategy::Load),
            "domcontentloaded" => Ok(WaitStrategy::DomContentLoaded),
            "networkidle" => Ok(WaitStrategy::NetworkIdle),
            _ => Err(format!("Unknown wait strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Top,
    #[default]
    Bottom,
    Up,
    Down,
}

/// One step of a browser automation script.
///
/// `Execute` runs caller-supplied JavaScript in the page and is the only
/// variant that does so; browser renderers may refuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BrowserAction {
    #[serde(rename_all = "camelCase")]
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_after: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_after: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Fill {
        selector: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_after: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Execute {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_after: Option<u64>,
    },
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default = "default_full_page")]
        full_page: bool,
    },
}

fn default_full_page() -> bool {
    true
}

impl BrowserAction {
    pub fn kind(&self) -> &'static str {
        match self {
            BrowserAction::Click { .. } => "click",
            BrowserAction::Scroll { .. } => "scroll",
            BrowserAction::Fill { .. } => "fill",
            BrowserAction::Execute { .. } => "execute",
            BrowserAction::Wait { .. } => "wait",
            BrowserAction::Screenshot { .. } => "screenshot",
        }
    }

    pub fn runs_script(&self) -> bool {
        matches!(self, BrowserAction::Execute { .. })
    }

    /// Pause to apply after the action completes, if any.
    pub fn wait_after(&self) -> Option<Duration> {
        match self {
            BrowserAction::Click { wait_after, .. }
            | BrowserAction::Scroll { wait_after, .. }
            | BrowserAction::Fill { wait_after, .. }
            | BrowserAction::Execute { wait_after, .. } => wait_after.map(Duration::from_millis),
            BrowserAction::Wait { .. } | BrowserAction::Screenshot { .. } => None,
        }
    }

    /// Longest pause the action asks for: its own `timeout` for a wait,
    /// `waitAfter` otherwise.
    pub fn requested_pause(&self) -> Option<Duration> {
        match self {
            BrowserAction::Wait { timeout, .. } => timeout.map(Duration::from_millis),
            _ => self.wait_after(),
        }
    }

    fn validate(&self, index: usize, budget_ms: u64) -> Result<(), AppError> {
        if let Some(pause) = self.requested_pause()
            && pause.as_millis() > u128::from(budget_ms)
        {
            return Err(AppError::Validation(format!(
                "actions[{index}] ({}): wait of {} ms exceeds the request timeout of {budget_ms} ms",
                self.kind(),
                pause.as_millis()
            )));
        }

        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(AppError::Validation(format!(
                    "actions[{index}] ({}): {field} must not be empty",
                    self.kind()
                )))
            } else {
                Ok(())
            }
        };
        match self {
            BrowserAction::Click { selector, .. } | BrowserAction::Fill { selector, .. } => {
                blank("selector", selector)
            }
            BrowserAction::Execute { script, .. } => blank("script", script),
            BrowserAction::Wait {
                selector: Some(selector),
                ..
            } => blank("selector", selector),
            _ => Ok(()),
        }
    }
}

/// Everything a caller can ask of one scrape, shared by the synchronous path
/// and queued jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeConfig {
    pub render_mode: RenderMode,
    pub wait_for: WaitStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    pub screenshot: bool,
    pub pdf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<BrowserAction>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Auto,
            wait_for: WaitStrategy::Load,
            wait_for_selector: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            screenshot: false,
            pdf: false,
            extract_schema: None,
            extract_prompt: None,
            actions: Vec::new(),
            headers: BTreeMap::new(),
            cookies: Vec::new(),
        }
    }
}

impl ScrapeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn wants_extraction(&self) -> bool {
        self.extract_schema.is_some() || self.extract_prompt.is_some()
    }

    /// Reject malformed configuration. Runs before any credit check.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(AppError::Validation(format!(
                "timeout must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} ms, got {}",
                self.timeout_ms
            )));
        }

        if let Some(selector) = &self.wait_for_selector
            && selector.trim().is_empty()
        {
            return Err(AppError::Validation(
                "waitForSelector must not be empty".into(),
            ));
        }

        if let Some(schema) = &self.extract_schema
            && !schema.is_object()
        {
            return Err(AppError::Validation(
                "extractSchema must be a JSON object".into(),
            ));
        }

        if let Some(prompt) = &self.extract_prompt {
            if prompt.trim().is_empty() {
                return Err(AppError::Validation(
                    "extractPrompt must not be empty".into(),
                ));
            }
            if prompt.chars().count() > MAX_PROMPT_CHARS {
                return Err(AppError::Validation(format!(
                    "extractPrompt must be at most {MAX_PROMPT_CHARS} characters"
                )));
            }
        }

        if self.actions.len() > MAX_ACTIONS {
            return Err(AppError::Validation(format!(
                "at most {MAX_ACTIONS} actions are allowed, got {}",
                self.actions.len()
            )));
        }
        for (index, action) in self.actions.iter().enumerate() {
            action.validate(index, self.timeout_ms)?;
        }

        for cookie in &self.cookies {
            if cookie.name.trim().is_empty() {
                return Err(AppError::Validation("cookie name must not be empty".into()));
            }
        }

        Ok(())
    }
}

/// Parse and check a scrape target: absolute http(s) URL with a host.
pub fn validate_target_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("Invalid URL format '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::Validation(format!("URL has no host: {raw}")));
    }

    Ok(url)
}
