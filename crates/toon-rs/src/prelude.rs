//! Convenience re-exports for common `toon-rs` types.
//!
//! ```ignore
//! use toon_rs::prelude::*;
//! ```

// ── Cache ───────────────────────────────────────────────────────────
pub use crate::cache::{ChunkResolution, PromptFragmentCache, SharedFragmentCache};
pub use crate::error::{CacheError, CacheResult};
pub use crate::fragment::{FragmentKey, FragmentKind, Resolution};
pub use crate::level::OptimizationLevel;
pub use crate::metrics::CacheMetrics;

// ── Composition ─────────────────────────────────────────────────────
pub use crate::chunker::{Chunk, JsonChunker};
pub use crate::payload::{OutboundPayload, PayloadBuilder};
pub use crate::tokens::{TokenEstimator, estimate_tokens};

// ── Orchestration ───────────────────────────────────────────────────
pub use crate::api::{
    BackendError, ChunkResponse, CompletionBackend, DryRunBackend, OpenRouterBackend,
    RetryConfig,
};
pub use crate::orchestrator::{ChunkJob, ChunkOrchestrator, RunConfig, RunReport};
