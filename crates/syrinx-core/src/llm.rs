//! Chat-completions access for every model the platform talks to.
//!
//! [`ChatBackend`] is the seam the orchestrator programs against; the
//! production implementation is [`ChatClient`], a thin OpenAI-compatible
//! client that also serves the Fireworks-hosted Llama endpoint. Pick the
//! endpoint for an agent's configured model with [`endpoint_for`];
//! unknown models fall back to the default.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::models::{ChatMessage, Tool};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const FIREWORKS_API_BASE: &str = "https://api.fireworks.ai/inference/v1";

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const FIREWORKS_LLAMA_70B: &str = "accounts/fireworks/models/llama-v3-70b-instruct";

/// A tool call the model asked for: function name plus raw JSON arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
}

/// Seam for everything that needs a chat completion. Implemented by
/// [`ChatClient`] in production and by scripted fakes in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One full completion over the given transcript.
    async fn complete(&self, messages: &[ChatMessage]) -> CoreResult<String>;

    /// Completion in JSON-object response mode; returns the raw content.
    async fn complete_json(&self, messages: &[ChatMessage]) -> CoreResult<String>;

    /// Completion with function tools exposed; returns the requested calls
    /// (empty when the model answered in prose).
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> CoreResult<Vec<ToolInvocation>>;
}

/// Resolved endpoint for one model name.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

/// Model table. `gpt-4o` goes to the default endpoint, `syrinx-voice`
/// (the tuned voice model) to the Fireworks-hosted Llama-3-70B; anything
/// else falls back to the default.
pub fn endpoint_for(cfg: &Config, model: &str) -> LlmEndpoint {
    match model {
        "syrinx-voice" => LlmEndpoint {
            base_url: FIREWORKS_API_BASE.to_string(),
            model: FIREWORKS_LLAMA_70B.to_string(),
            api_key: cfg.fireworks_api_key.clone(),
        },
        _ => LlmEndpoint {
            base_url: OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: cfg.openai_api_key.clone(),
        },
    }
}

// OpenAI-compatible wire types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Production chat client for one endpoint.
pub struct ChatClient {
    endpoint: LlmEndpoint,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(endpoint: LlmEndpoint) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { endpoint, client }
    }

    /// Client for an agent's configured model name.
    pub fn for_model(cfg: &Config, model: &str) -> Self {
        Self::new(endpoint_for(cfg, model))
    }

    /// Client for the Fireworks endpoint directly (endpointing probe).
    pub fn fireworks(cfg: &Config) -> Self {
        Self::new(LlmEndpoint {
            base_url: FIREWORKS_API_BASE.to_string(),
            model: FIREWORKS_LLAMA_70B.to_string(),
            api_key: cfg.fireworks_api_key.clone(),
        })
    }

    async fn request(&self, body: &ChatRequest<'_>) -> CoreResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::Llm(format!("chat API error {status}: {text}")));
        }
        Ok(res.json().await?)
    }

    fn first_content(resp: ChatResponse) -> CoreResult<String> {
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CoreError::Llm("chat response had no content".to_string()))
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> CoreResult<String> {
        let resp = self
            .request(&ChatRequest {
                model: &self.endpoint.model,
                messages,
                response_format: None,
                tools: None,
            })
            .await?;
        Self::first_content(resp)
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> CoreResult<String> {
        let resp = self
            .request(&ChatRequest {
                model: &self.endpoint.model,
                messages,
                response_format: Some(ResponseFormat { kind: "json_object" }),
                tools: None,
            })
            .await?;
        Self::first_content(resp)
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> CoreResult<Vec<ToolInvocation>> {
        let resp = self
            .request(&ChatRequest {
                model: &self.endpoint.model,
                messages,
                response_format: None,
                tools: Some(tools),
            })
            .await?;
        let calls = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolInvocation { name: t.function.name, arguments: t.function.arguments })
            .collect();
        Ok(calls)
    }
}
