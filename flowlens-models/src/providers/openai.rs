//! OpenAI chat completions provider.
//!
//! # Example
//!
//! ```ignore
//! use flowlens_models::ApiKey;
//! use flowlens_models::providers::OpenAiProvider;
//!
//! let provider = OpenAiProvider::new(ApiKey::new("sk-..."))?;
//! let provider = OpenAiProvider::with_base_url(ApiKey::new("sk-..."), "http://localhost:8080/v1")?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatRequest, ChatResponse, Message, Role, StopReason, Usage};
use crate::{ApiKey, Error, Result};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Completions can take a while on large prompts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ────────────────────────────────────────────────────────────────────────────
// OpenAI API Wire Types
// ────────────────────────────────────────────────────────────────────────────

/// Message in an OpenAI chat request/response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl From<&Message> for OpenAiMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: Some(message.content.clone()),
        }
    }
}

/// Request body for `/chat/completions`.
#[derive(Debug, Serialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl From<ChatRequest> for OpenAiChatRequest {
    fn from(request: ChatRequest) -> Self {
        Self {
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            model: request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Response from `/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct OpenAiChatResponse {
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = Error;

    fn try_from(response: OpenAiChatResponse) -> Result<Self> {
        let usage = response.usage.unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmptyCompletion("no choices returned".to_string()))?;
        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::EmptyCompletion("choice has no content".to_string()))?;

        Ok(Self {
            content,
            stop_reason: StopReason::from_finish_reason(choice.finish_reason.as_deref()),
            usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
        })
    }
}

/// Error envelope OpenAI uses for non-2xx answers.
#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<OpenAiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAiProvider
// ────────────────────────────────────────────────────────────────────────────

/// OpenAI (or API-compatible) chat completions provider.
pub struct OpenAiProvider {
    base_url: String,
    api_key: ApiKey,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider against the public OpenAI endpoint.
    pub fn new(api_key: ApiKey) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE_URL)
    }

    /// Create a provider against a custom, API-compatible base URL.
    pub fn with_base_url(api_key: ApiKey, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Get the base URL for this provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a chat completion request.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        if self.api_key.is_blank() {
            return Err(Error::InvalidApiKey);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest::from(request);
        debug!(model = %body.model, messages = body.messages.len(), "sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ProviderApi {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;
        let parsed: OpenAiChatResponse = serde_json::from_str(&text)?;
        let response = ChatResponse::try_from(parsed)?;

        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "chat completion finished"
        );
        Ok(response)
    }
}

#[async_trait::async_trait]
impl super::ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat(request).await
    }
}
