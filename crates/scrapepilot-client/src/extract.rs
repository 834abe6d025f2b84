use scrapepilot_core::error::AppError;
use scrapepilot_core::models::{ExtractionFormat, ExtractionSuggestion, PromptExtraction};
use scrapepilot_core::traits::{Extractor, LanguageModel};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{LlmConfig, OpenAiBackend};
use crate::page::extraction_text;

/// Most suggestions returned by [`Extractor::detect_extractable`].
pub const MAX_SUGGESTIONS: usize = 5;

const SCHEMA_SYSTEM_PROMPT: &str = "You are a data extraction assistant. Extract structured data \
from the provided webpage content according to the given schema. Return only valid JSON matching \
the schema structure. If a field cannot be found, use null.";

const PROMPT_SYSTEM_PROMPT: &str = "You are a data extraction assistant. Follow the user's \
instruction against the provided webpage content. Respond with a JSON object of the form \
{\"format\": \"list\" | \"object\" | \"text\", \"data\": <extracted data>, \"confidence\": <number \
between 0 and 1>}. Use \"list\" with an array for repeated items, \"object\" with an object for a \
single record and \"text\" with a string for a summary.";

const DETECT_SYSTEM_PROMPT: &str = "You analyse webpages and propose data that could be extracted \
from them. Respond with a JSON object of the form {\"suggestions\": [{\"name\": string, \
\"description\": string, \"fields\": [string], \"confidence\": <number between 0 and 1>, \
\"prompt\": string}]}. Propose at most five suggestions, most useful first. Each prompt must be a \
self-contained extraction instruction.";

/// Extraction stage backed by one or more language models, tried in order.
///
/// With no backend configured every operation is a no-op.
#[derive(Clone)]
pub struct LlmExtractor<M> {
    backends: Vec<M>,
}

impl LlmExtractor<OpenAiBackend> {
    pub fn from_config(config: &LlmConfig) -> Result<Self, AppError> {
        Ok(Self::new(config.backends()?))
    }
}

impl<M: LanguageModel> LlmExtractor<M> {
    pub fn new(backends: Vec<M>) -> Self {
        Self { backends }
    }

    /// First successful completion across the backends.
    async fn complete(&self, system: &str, user: &str) -> Option<String> {
        for backend in &self.backends {
            match backend.complete(system, user).await {
                Ok(content) => return Some(content),
                Err(e) => {
                    tracing::warn!(provider = backend.name(), "Extraction backend failed: {e}");
                }
            }
        }
        None
    }

    /// Complete and parse the answer as JSON, logging parse failures.
    async fn complete_json(&self, operation: &str, system: &str, user: &str) -> Option<Value> {
        if self.backends.is_empty() {
            tracing::warn!(operation, "AI extraction not configured, skipping");
            return None;
        }
        let content = self.complete(system, user).await?;
        match serde_json::from_str(strip_code_fence(&content)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, "Extraction backend returned invalid JSON: {e}");
                None
            }
        }
    }
}

impl<M: LanguageModel> Extractor for LlmExtractor<M> {
    fn is_configured(&self) -> bool {
        !self.backends.is_empty()
    }

    fn providers(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    async fn extract_by_schema(&self, html: &str, schema: &Value) -> Option<Value> {
        let schema_text = serde_json::to_string_pretty(schema).ok()?;
        let user = format!(
            "Extract data from this webpage content according to this schema:\n\n\
             Schema:\n{schema_text}\n\nWebpage Content:\n{}\n\n\
             Return only the extracted JSON data, no explanation.",
            extraction_text(html)
        );

        let value = self.complete_json("schema", SCHEMA_SYSTEM_PROMPT, &user).await?;
        let Value::Object(mut data) = value else {
            tracing::warn!("Schema extraction returned a non-object value");
            return None;
        };
        for field in schema_fields(schema) {
            data.entry(field).or_insert(Value::Null);
        }
        Some(Value::Object(data))
    }

    async fn extract_by_prompt(&self, html: &str, prompt: &str) -> Option<PromptExtraction> {
        let user = format!(
            "Instruction:\n{prompt}\n\nWebpage Content:\n{}",
            extraction_text(html)
        );
        let value = self.complete_json("prompt", PROMPT_SYSTEM_PROMPT, &user).await?;
        Some(parse_prompt_extraction(value))
    }

    async fn detect_extractable(&self, html: &str) -> Vec<ExtractionSuggestion> {
        let user = format!("Webpage Content:\n{}", extraction_text(html));
        match self.complete_json("detect", DETECT_SYSTEM_PROMPT, &user).await {
            Some(value) => parse_suggestions(value),
            None => Vec::new(),
        }
    }
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Field names a schema asks for: JSON-Schema `properties` when present,
/// otherwise the schema's own top-level keys.
fn schema_fields(schema: &Value) -> Vec<String> {
    let fields = schema
        .get("properties")
        .and_then(Value::as_object)
        .or_else(|| schema.as_object());
    fields
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default()
}

fn parse_prompt_extraction(value: Value) -> PromptExtraction {
    let (data, declared, confidence) = match value {
        Value::Object(mut object) if object.contains_key("data") => {
            let data = object.remove("data").unwrap_or(Value::Null);
            let declared = object
                .get("format")
                .and_then(Value::as_str)
                .and_then(|f| f.parse::<ExtractionFormat>().ok());
            let confidence = object.get("confidence").and_then(Value::as_f64);
            (data, declared, confidence)
        }
        other => (other, None, None),
    };

    PromptExtraction {
        format: declared.unwrap_or_else(|| ExtractionFormat::of(&data)),
        data,
        confidence: clamp_confidence(confidence),
    }
}

fn clamp_confidence(confidence: Option<f64>) -> f64 {
    confidence
        .filter(|c| c.is_finite())
        .map_or(0.0, |c| c.clamp(0.0, 1.0))
}

#[derive(Deserialize)]
struct RawSuggestion {
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    fields: Vec<Value>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    prompt: Option<String>,
}

fn parse_suggestions(value: Value) -> Vec<ExtractionSuggestion> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("suggestions") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawSuggestion>(item).ok())
        .filter_map(|raw| {
            let name = raw.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
            let fields: Vec<String> = raw
                .fields
                .into_iter()
                .filter_map(|f| match f {
                    Value::String(s) => Some(s),
                    Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect();
            let prompt = raw
                .prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| synthesize_prompt(&name, &fields));
            Some(ExtractionSuggestion {
                description: raw.description.unwrap_or_default(),
                confidence: clamp_confidence(raw.confidence),
                name,
                fields,
                prompt,
            })
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}

fn synthesize_prompt(name: &str, fields: &[String]) -> String {
    if fields.is_empty() {
        format!("Extract all {name} from the page.")
    } else {
        format!(
            "Extract all {name} from the page with these fields: {}.",
            fields.join(", ")
        )
    }
}
