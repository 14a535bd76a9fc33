//! Error types for the fragment cache and the chunking layer.
//!
//! Every failure here is a local validation failure: the cache performs no
//! I/O, so nothing is retryable. A rejected call never leaves the session
//! partially updated. Backend (network) errors live in
//! [`api::BackendError`](crate::api::BackendError).

use thiserror::Error;

/// Result alias for cache and chunker operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced synchronously by [`PromptFragmentCache`](crate::cache::PromptFragmentCache)
/// and [`JsonChunker`](crate::chunker::JsonChunker).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Blank category, negative / non-finite / inverted sizes, zero chunk budget.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Input could not be parsed or serialized as JSON.
    #[error("JSON error: {0}")]
    Json(String),
}

impl CacheError {
    /// Create a new invalid-argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
