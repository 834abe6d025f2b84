use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const MAX_LINKS: usize = 100;
pub const MAX_IMAGES: usize = 50;

/// Which render strategy produced a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStrategy {
    Http,
    Browser,
}

impl RenderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStrategy::Http => "http",
            RenderStrategy::Browser => "browser",
        }
    }
}

impl fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(RenderStrategy::Http),
            "browser" => Ok(RenderStrategy::Browser),
            _ => Err(format!("Unknown render strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Absolute outbound links, capped at [`MAX_LINKS`].
    pub links: Vec<String>,
    /// Absolute image URLs, capped at [`MAX_IMAGES`].
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub load_time_ms: u64,
    /// Time spent after load (selector waits, actions, captures). Browser only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_time_ms: Option<u64>,
}

/// Outcome of one browser action. Failures are recorded, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub index: usize,
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Value returned by an `execute` action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Data URL captured by a `screenshot` action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Normalized output of either render strategy.
///
/// Browser-only fields stay `None` for HTTP captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderCapture {
    pub strategy: RenderStrategy,
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub html: String,
    pub text: String,
    pub metadata: PageMetadata,
    pub timing: Timing,
    /// HTML size in bytes.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_results: Option<Vec<ActionResult>>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Shape of a natural-language extraction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionFormat {
    List,
    Object,
    Text,
}

impl ExtractionFormat {
    /// Infer the format from the JSON kind of the extracted data.
    pub fn of(data: &serde_json::Value) -> Self {
        match data {
            serde_json::Value::Array(_) => ExtractionFormat::List,
            serde_json::Value::Object(_) => ExtractionFormat::Object,
            _ => ExtractionFormat::Text,
        }
    }
}

impl FromStr for ExtractionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "list" | "array" => Ok(ExtractionFormat::List),
            "object" | "single" => Ok(ExtractionFormat::Object),
            "text" | "summary" => Ok(ExtractionFormat::Text),
            _ => Err(format!("Unknown extraction format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptExtraction {
    pub data: serde_json::Value,
    pub format: ExtractionFormat,
    /// Model-reported, in [0, 1]. Advisory only.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSuggestion {
    pub name: String,
    pub description: String,
    pub fields: Vec<String>,
    pub confidence: f64,
    /// Ready to re-submit as an `extractPrompt`.
    pub prompt: String,
}

/// Derived data produced by the extraction stage for one scrape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutput {
    /// Schema-shaped data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_extraction: Option<PromptExtraction>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub load_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_time_ms: Option<u64>,
    pub size: u64,
}

/// Persisted output of a completed job. Read-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub html: String,
    pub text: String,
    pub metadata: PageMetadata,
    /// SHA-256 of the HTML.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_extraction: Option<PromptExtraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_results: Option<Vec<ActionResult>>,
    pub strategy: RenderStrategy,
    pub performance: Performance,
    pub created_at: DateTime<Utc>,
}

/// DTO for inserting a new result.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScrapeResult {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub html: String,
    pub text: String,
    pub metadata: PageMetadata,
    pub content_hash: String,
    pub screenshot: Option<String>,
    pub pdf: Option<String>,
    pub data: Option<serde_json::Value>,
    pub ai_extraction: Option<PromptExtraction>,
    pub action_results: Option<Vec<ActionResult>>,
    pub strategy: RenderStrategy,
    pub performance: Performance,
}

impl NewScrapeResult {
    pub fn from_capture(
        job_id: Uuid,
        owner_id: Uuid,
        capture: RenderCapture,
        extraction: ExtractionOutput,
    ) -> Self {
        let content_hash = compute_hash(&capture.html);
        Self {
            job_id,
            owner_id,
            url: capture.url,
            final_url: capture.final_url,
            status_code: capture.status_code,
            headers: capture.headers,
            html: capture.html,
            text: capture.text,
            metadata: capture.metadata,
            content_hash,
            screenshot: capture.screenshot,
            pdf: capture.pdf,
            data: extraction.data,
            ai_extraction: extraction.ai_extraction,
            action_results: capture.action_results,
            strategy: capture.strategy,
            performance: Performance {
                load_time_ms: capture.timing.load_time_ms,
                render_time_ms: capture.timing.render_time_ms,
                size: capture.size,
            },
        }
    }

    pub fn into_result(self, id: Uuid, created_at: DateTime<Utc>) -> ScrapeResult {
        ScrapeResult {
            id,
            job_id: self.job_id,
            owner_id: self.owner_id,
            url: self.url,
            final_url: self.final_url,
            status_code: self.status_code,
            headers: self.headers,
            html: self.html,
            text: self.text,
            metadata: self.metadata,
            content_hash: self.content_hash,
            screenshot: self.screenshot,
            pdf: self.pdf,
            data: self.data,
            ai_extraction: self.ai_extraction,
            action_results: self.action_results,
            strategy: self.strategy,
            performance: self.performance,
            created_at,
        }
    }
}

/// Response of a synchronous scrape: the capture plus any extracted data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutput {
    #[serde(flatten)]
    pub capture: RenderCapture,
    #[serde(flatten)]
    pub extraction: ExtractionOutput,
    pub credits_used: i64,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Scrape,
    Search,
    Map,
    Crawl,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Scrape => "scrape",
            Permission::Search => "search",
            Permission::Map => "map",
            Permission::Crawl => "crawl",
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(Permission::Scrape),
            "search" => Ok(Permission::Search),
            "map" => Ok(Permission::Map),
            "crawl" => Ok(Permission::Crawl),
            _ => Err(format!("Unknown permission: {s}")),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub credential_id: Uuid,
    pub permissions: Vec<Permission>,
}

impl Identity {
    pub fn require(&self, permission: Permission) -> Result<(), crate::AppError> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(crate::AppError::Forbidden(format!(
                "credential lacks the '{}' permission",
                permission.as_str()
            )))
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
