//! OpenRouter chat-completions backend.
//!
//! Every chunk is sent as a prefix-stable message list: system prompt, then
//! the instruction template, then the chunk body. Fragment parts eligible for
//! caching carry `cache_control: {"type": "ephemeral"}`. The first chunk
//! writes them to the provider's prompt cache and later chunks read them back,
//! which is what lets the session count them as already held by the far end.

use super::{BackendError, BackendFuture, ChunkResponse, CompletionBackend};
use crate::payload::OutboundPayload;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for chunk analysis.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    max_tokens: u32,
    temperature: f32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize, Debug, PartialEq)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Serialize, Debug, PartialEq)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: &'static str,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    usage: Option<RawUsage>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize, Debug)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Group consecutive same-role parts into one message each.
fn build_messages(payload: &OutboundPayload) -> Vec<WireMessage<'_>> {
    let mut messages: Vec<WireMessage<'_>> = Vec::new();
    for part in &payload.parts {
        let block = ContentBlock {
            block_type: "text",
            text: &part.text,
            cache_control: part.cacheable.then_some(CacheControl {
                control_type: "ephemeral",
            }),
        };
        let role = part.role.as_str();
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => messages.push(WireMessage {
                role,
                content: vec![block],
            }),
        }
    }
    messages
}

fn parse_response(text: &str) -> Result<ChunkResponse, BackendError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| BackendError::Parse(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(BackendError::Api {
            status: 200,
            body: err.message,
        });
    }

    let content = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    let (prompt_tokens, completion_tokens, cached_tokens) = match parsed.usage {
        Some(u) => (
            u.prompt_tokens,
            u.completion_tokens,
            u.prompt_tokens_details.and_then(|d| d.cached_tokens),
        ),
        None => (None, None, None),
    };

    Ok(ChunkResponse {
        content,
        prompt_tokens,
        completion_tokens,
        cached_tokens,
    })
}

// ── Backend ────────────────────────────────────────────────────────

/// Async HTTP backend for the OpenRouter chat completions API.
pub struct OpenRouterBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterBackend {
    /// Create a backend with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent("toon-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.3,
        })
    }

    /// Read the API key from the `OPENROUTER_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self, BackendError> {
        let api_key = std::env::var("OPENROUTER_KEY").map_err(|_| BackendError::MissingApiKey)?;
        Self::new(api_key, model)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<ChunkResponse, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(payload),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        debug!(
            "LLM request: chunk={}, model={}, messages={}, transmitted_tokens={}",
            payload.chunk_index,
            self.model,
            body.messages.len(),
            payload.size_actual(),
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "toon-rs")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Http(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: chunk={}, HTTP {} in {:.1}s ({} bytes)",
            payload.chunk_index,
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let response = parse_response(&text)?;
        if let Some(cached) = response.cached_tokens {
            debug!("Provider cache served {cached} prompt tokens");
        }
        Ok(response)
    }
}

impl std::fmt::Debug for OpenRouterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterBackend")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl CompletionBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn complete<'a>(&'a self, payload: &'a OutboundPayload) -> BackendFuture<'a> {
        Box::pin(self.send(payload))
    }
}
