//! Prompt fragment caching for chunked LLM requests.
//!
//! When one oversized input is split into many chunks and each chunk is sent
//! to a text-generation API, the system prompt and the category's instruction
//! template are identical on every call. `toon-rs` keeps those fragments in a
//! session-scoped [`PromptFragmentCache`](cache::PromptFragmentCache) that
//! tells the caller, chunk by chunk, which fragments the far end already
//! holds, and accounts for the tokens that were not resent.
//!
//! # Getting started
//!
//! ```
//! use toon_rs::prelude::*;
//!
//! # async fn demo() -> Result<(), CacheError> {
//! let chunks = JsonChunker::new(1500)?.chunk_str(r#"[{"id":1},{"id":2}]"#)?;
//! let jobs = ChunkJob::from_chunks(chunks, "incident", "List root causes per event.");
//!
//! let report = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default())
//!     .run("You are an SRE assistant.", jobs)
//!     .await?;
//!
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! # Where to find things
//!
//! - **The cache itself:** [`cache::PromptFragmentCache`] resolves fragments,
//!   records chunk sizes and reports metrics. [`cache::SharedFragmentCache`] serializes resolution when
//!   chunks are dispatched concurrently.
//! - **What may be cached:** [`level::OptimizationLevel`].
//! - **Composing a request:** [`payload::PayloadBuilder`] and
//!   [`payload::OutboundPayload`], sized with [`tokens::TokenEstimator`].
//! - **Splitting input:** [`chunker::JsonChunker`].
//! - **Running a whole input:** [`orchestrator::ChunkOrchestrator`].
//! - **Talking to a provider:** [`api::CompletionBackend`],
//!   [`api::DryRunBackend`], [`api::OpenRouterBackend`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Session-scoped fragment cache and savings counters |
//! | [`fragment`] | Fragment keys, kinds, and resolution results |
//! | [`level`] | Optimization levels and fragment eligibility |
//! | [`metrics`] | Read-only savings view |
//! | [`payload`] | Prefix-stable outbound payload composition |
//! | [`chunker`] | Token-bounded JSON chunking |
//! | [`orchestrator`] | Per-run driver with bounded concurrency |
//! | [`api`] | Backends, retry with backoff, pricing |

pub mod api;
pub mod cache;
pub mod chunker;
pub mod error;
pub mod fragment;
pub mod level;
pub mod metrics;
pub mod orchestrator;
pub mod payload;
pub mod prelude;
pub mod tokens;

pub use error::{CacheError, CacheResult};
