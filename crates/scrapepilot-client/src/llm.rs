use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use scrapepilot_core::error::AppError;
use scrapepilot_core::traits::LanguageModel;
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TOKENS: u32 = 4000;

/// A supported OpenAI-compatible provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Groq,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Groq => "groq",
            Provider::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Ollama => "llama3.2",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "groq" => Ok(Provider::Groq),
            "ollama" => Ok(Provider::Ollama),
            _ => Err(format!("Unknown AI provider: {s}")),
        }
    }
}

/// Connection details for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// Extraction backends available to this process, preferred first.
///
/// An empty list is valid: extraction then degrades to no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
}

impl LlmConfig {
    /// Read `AI_PROVIDER`, `OPENAI_API_KEY`, `GROQ_API_KEY`, `OLLAMA_URL`,
    /// `OLLAMA_MODEL` and `AI_MODEL`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let preferred = match get("AI_PROVIDER") {
            Some(raw) => raw.parse::<Provider>().map_err(AppError::ConfigError)?,
            None => Provider::OpenAi,
        };

        let mut providers = Vec::new();
        if let Some(key) = get("OPENAI_API_KEY") {
            providers.push(ProviderConfig {
                provider: Provider::OpenAi,
                base_url: OPENAI_BASE_URL.to_string(),
                api_key: Some(key),
                model: Provider::OpenAi.default_model().to_string(),
            });
        }
        if let Some(key) = get("GROQ_API_KEY") {
            providers.push(ProviderConfig {
                provider: Provider::Groq,
                base_url: GROQ_BASE_URL.to_string(),
                api_key: Some(key),
                model: Provider::Groq.default_model().to_string(),
            });
        }
        // Ollama needs no key; it counts as configured once pointed at or chosen.
        let ollama_url = get("OLLAMA_URL");
        if ollama_url.is_some() || preferred == Provider::Ollama {
            let base = ollama_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            providers.push(ProviderConfig {
                provider: Provider::Ollama,
                base_url: format!("{}/v1", base.trim_end_matches('/')),
                api_key: None,
                model: get("OLLAMA_MODEL")
                    .unwrap_or_else(|| Provider::Ollama.default_model().to_string()),
            });
        }

        // Preferred provider first, the rest in declaration order.
        providers.sort_by_key(|p| p.provider != preferred);
        if let Some(model) = get("AI_MODEL")
            && let Some(first) = providers.first_mut()
            && first.provider == preferred
        {
            first.model = model;
        }

        Ok(Self { providers })
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn backends(&self) -> Result<Vec<OpenAiBackend>, AppError> {
        self.providers.iter().map(OpenAiBackend::new).collect()
    }
}

/// OpenAI-compatible chat-completions client.
///
/// Works with any OpenAI-compatible API, including:
/// - OpenAI directly (`https://api.openai.com/v1`)
/// - Groq (`https://api.groq.com/openai/v1`)
/// - Ollama's compatibility layer (`http://localhost:11434/v1`)
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    label: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(config: &ProviderConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client(DEFAULT_LLM_TIMEOUT)?,
            label: config.provider.as_str().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: DEFAULT_LLM_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AppError> {
        self.client = http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl LanguageModel for OpenAiBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout.as_millis() as u64)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })
    }
}
