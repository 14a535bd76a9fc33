//! Completion backends, retry with backoff, and pricing.
//!
//! The orchestrator talks to a text-generation service only through the
//! [`CompletionBackend`] trait. Two implementations ship:
//!
//! - [`DryRunBackend`] never touches the network. It is used to measure what a run
//!   would save before spending anything.
//! - [`OpenRouterBackend`](openrouter::OpenRouterBackend) sends OpenRouter chat
//!   completions with provider prompt caching on eligible fragments.

pub mod openrouter;
pub mod pricing;
pub mod retry;

use crate::payload::OutboundPayload;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub use openrouter::OpenRouterBackend;
pub use pricing::{ModelPricing, pricing_for_model};
pub use retry::RetryConfig;

/// Boxed future returned by [`CompletionBackend::complete`].
pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChunkResponse, BackendError>> + Send + 'a>>;

/// Errors from a completion backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network-level failure (connect, timeout, reset).
    #[error("request failed: {0}")]
    Http(String),

    /// Non-success HTTP status or API error object.
    #[error("API HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("OPENROUTER_KEY environment variable is not set")]
    MissingApiKey,
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(_) => true,
            BackendError::Api { status, .. } => retry::is_transient_status(*status),
            BackendError::Parse(_) | BackendError::MissingApiKey => false,
        }
    }
}

/// What a backend returned for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkResponse {
    pub content: String,
    /// Prompt tokens reported by the provider, if any.
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    /// Prompt tokens the provider served from its cache.
    pub cached_tokens: Option<u64>,
}

/// A text-generation service that accepts composed chunk payloads.
pub trait CompletionBackend: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Send one payload and return the model's response.
    fn complete<'a>(&'a self, payload: &'a OutboundPayload) -> BackendFuture<'a>;
}

/// Backend that records nothing and sends nothing.
///
/// Reports the payload's transmitted size as prompt tokens so dry-run reports
/// line up with what a live run would bill.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBackend;

impl CompletionBackend for DryRunBackend {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn complete<'a>(&'a self, payload: &'a OutboundPayload) -> BackendFuture<'a> {
        Box::pin(async move {
            Ok(ChunkResponse {
                content: String::new(),
                prompt_tokens: Some(payload.size_actual()),
                completion_tokens: Some(0),
                cached_tokens: Some(payload.size_if_uncached() - payload.size_actual()),
            })
        })
    }
}
