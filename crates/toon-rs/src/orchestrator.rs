//! Chunk orchestration: one fragment-cache session per run.
//!
//! [`ChunkOrchestrator::run`] creates a fresh [`PromptFragmentCache`] for the
//! run, then for every chunk:
//!
//! 1. resolves the system prompt and the chunk's instruction template,
//! 2. composes the [`OutboundPayload`],
//! 3. dispatches it through the [`CompletionBackend`] (with retry),
//! 4. records both payload sizes in the session.
//!
//! Up to `concurrency` dispatches may be in flight at once. Steps 1-2 run
//! synchronously in chunk order as each slot frees up, behind the session
//! mutex, so only the first chunk ever sees a fragment as unsent. Step 4 may
//! complete in any order; the counters commute.
//!
//! With `concurrency > 1`, chunks dispatched while chunk 0 is still in flight
//! already omit the fragments and are counted as saved, although the
//! provider's prompt cache is only written once chunk 0's request completes.
//! Until then the reported savings are optimistic: the provider may bill
//! those early chunks' fragments at the uncached rate.

use crate::api::pricing::ModelPricing;
use crate::api::retry::{RetryConfig, with_retry};
use crate::api::{ChunkResponse, CompletionBackend};
use crate::cache::{PromptFragmentCache, SharedFragmentCache};
use crate::chunker::Chunk;
use crate::error::{CacheError, CacheResult};
use crate::level::OptimizationLevel;
use crate::metrics::CacheMetrics;
use crate::payload::{OutboundPayload, PayloadBuilder};
use crate::tokens::TokenEstimator;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Settings for one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Which fragment kinds may be served from cache. Default: `Aggressive`.
    pub level: OptimizationLevel,
    /// Maximum dispatches in flight. Default: `1` (strictly sequential).
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub estimator: TokenEstimator,
    /// Pricing used for the report's dollar figures.
    pub pricing: ModelPricing,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            level: OptimizationLevel::default(),
            concurrency: 1,
            retry: RetryConfig::default(),
            estimator: TokenEstimator::default(),
            pricing: ModelPricing::default(),
        }
    }
}

impl RunConfig {
    pub fn with_level(mut self, level: OptimizationLevel) -> Self {
        self.level = level;
        self
    }

    /// Values below 1 are treated as 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }
}

/// One unit of work: a chunk body plus the category it is analysed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    pub index: usize,
    pub category: String,
    /// Canonical template text for `category`.
    pub template: String,
    pub body: String,
}

impl ChunkJob {
    /// Jobs for every chunk of one input, all under the same category.
    pub fn from_chunks(chunks: Vec<Chunk>, category: &str, template: &str) -> Vec<ChunkJob> {
        chunks
            .into_iter()
            .map(|chunk| ChunkJob {
                index: chunk.index,
                category: category.to_string(),
                template: template.to_string(),
                body: chunk.body,
            })
            .collect()
    }
}

/// A chunk the backend answered.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResult {
    pub index: usize,
    pub size_if_uncached: u64,
    pub size_actual: u64,
    pub response: ChunkResponse,
}

/// A chunk the backend failed on after retries.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub error: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub backend: String,
    pub level: OptimizationLevel,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: CacheMetrics,
    pub template_mismatches: u64,
    /// Completion tokens reported across answered chunks.
    pub completion_tokens: u64,
    /// Ordered by chunk index.
    pub results: Vec<ChunkResult>,
    /// Ordered by chunk index.
    pub failures: Vec<ChunkFailure>,
    pub estimated_cost_without_caching_usd: f64,
    pub estimated_cost_with_caching_usd: f64,
    /// Output cost of `completion_tokens`; identical with or without caching.
    pub estimated_output_cost_usd: f64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("backend: {} (level: {})", self.backend, self.level),
            self.metrics.to_log_string(),
            format!(
                "est. input cost: ${:.4} uncached -> ${:.4} cached (saved ${:.4})",
                self.estimated_cost_without_caching_usd,
                self.estimated_cost_with_caching_usd,
                self.estimated_cost_without_caching_usd - self.estimated_cost_with_caching_usd,
            ),
        ];
        if self.completion_tokens > 0 {
            lines.push(format!(
                "est. output cost: ${:.4} ({} completion tokens)",
                self.estimated_output_cost_usd, self.completion_tokens
            ));
        }
        if self.template_mismatches > 0 {
            lines.push(format!(
                "template mismatches: {} (cached text was used)",
                self.template_mismatches
            ));
        }
        if !self.failures.is_empty() {
            lines.push(format!("failed chunks: {}", self.failures.len()));
            for failure in &self.failures {
                lines.push(format!("  #{}: {}", failure.index, failure.error));
            }
        }
        lines.join("\n")
    }
}

enum ChunkOutcome {
    Done(ChunkResult),
    Failed(ChunkFailure),
}

/// Drives chunks through a backend with one fragment-cache session per run.
pub struct ChunkOrchestrator<'a> {
    backend: &'a dyn CompletionBackend,
    config: RunConfig,
}

impl<'a> ChunkOrchestrator<'a> {
    pub fn new(backend: &'a dyn CompletionBackend, config: RunConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Process `jobs` in order and report savings.
    ///
    /// Returns `Err` only for invalid input (a blank category), checked before
    /// anything is dispatched. Backend failures are reported per chunk.
    pub async fn run(&self, system_prompt: &str, jobs: Vec<ChunkJob>) -> CacheResult<RunReport> {
        if let Some(job) = jobs.iter().find(|j| j.category.trim().is_empty()) {
            return Err(CacheError::invalid(format!(
                "chunk {} has a blank category",
                job.index
            )));
        }

        let session = SharedFragmentCache::new(
            PromptFragmentCache::new(system_prompt).with_level(self.config.level),
        );
        let started_at = session.started_at();
        info!(
            "Starting run: {} chunk(s), backend={}, level={}, concurrency={}",
            jobs.len(),
            self.backend.name(),
            self.config.level,
            self.config.concurrency,
        );

        let outcomes: Vec<ChunkOutcome> = stream::iter(jobs)
            .map(|job| {
                let prepared = self.prepare(&session, &job);
                let session = session.clone();
                async move {
                    match prepared {
                        Ok(payload) => self.dispatch(&session, payload).await,
                        Err(e) => ChunkOutcome::Failed(ChunkFailure {
                            index: job.index,
                            error: e.to_string(),
                        }),
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Done(result) => results.push(result),
                ChunkOutcome::Failed(failure) => failures.push(failure),
            }
        }
        results.sort_by_key(|r| r.index);
        failures.sort_by_key(|f| f.index);

        let metrics = session.metrics();
        let completion_tokens: u64 = results
            .iter()
            .filter_map(|r| r.response.completion_tokens)
            .sum();
        let report = RunReport {
            backend: self.backend.name().to_string(),
            level: self.config.level,
            started_at,
            finished_at: Utc::now(),
            metrics,
            template_mismatches: session.template_mismatches(),
            completion_tokens,
            results,
            failures,
            estimated_cost_without_caching_usd: metrics.cost_without_caching(&self.config.pricing),
            estimated_cost_with_caching_usd: metrics.cost_with_caching(&self.config.pricing),
            estimated_output_cost_usd: self.config.pricing.output_cost(completion_tokens),
        };
        info!("Run finished: {}", report.metrics.to_log_string());
        Ok(report)
    }

    /// Resolve fragments and compose the payload for one chunk.
    fn prepare(&self, session: &SharedFragmentCache, job: &ChunkJob) -> CacheResult<OutboundPayload> {
        let resolved = session.resolve_chunk(&job.category, &job.template)?;
        let payload = PayloadBuilder::new(job.index)
            .with_estimator(self.config.estimator)
            .resolved(&resolved)
            .chunk(job.body.clone())
            .build();
        debug!(
            "Chunk {}: system_sent={}, template_sent={}, {} of {} tokens transmitted",
            job.index,
            resolved.system.already_sent,
            resolved.template.already_sent,
            payload.size_actual(),
            payload.size_if_uncached(),
        );
        Ok(payload)
    }

    async fn dispatch(&self, session: &SharedFragmentCache, payload: OutboundPayload) -> ChunkOutcome {
        let label = format!("chunk {}", payload.chunk_index);
        let result = with_retry(&self.config.retry, &label, || self.backend.complete(&payload)).await;

        let size_if_uncached = payload.size_if_uncached();
        let size_actual = payload.size_actual();
        // Recorded on failure too: the fragments went out with the request.
        if let Err(e) = session.record_chunk(size_if_uncached as f64, size_actual as f64) {
            warn!("{label}: could not record sizes: {e}");
        }

        match result {
            Ok(response) => ChunkOutcome::Done(ChunkResult {
                index: payload.chunk_index,
                size_if_uncached,
                size_actual,
                response,
            }),
            Err(e) => {
                warn!("{label} failed: {e}");
                ChunkOutcome::Failed(ChunkFailure {
                    index: payload.chunk_index,
                    error: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BackendError, BackendFuture, DryRunBackend};
    use crate::payload::PartKind;
    use crate::fragment::FragmentKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Records every payload it receives.
    #[derive(Default)]
    struct RecordingBackend {
        payloads: Mutex<Vec<OutboundPayload>>,
    }

    impl CompletionBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn complete<'a>(&'a self, payload: &'a OutboundPayload) -> BackendFuture<'a> {
            Box::pin(async move {
                self.payloads.lock().unwrap().push(payload.clone());
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(ChunkResponse {
                    content: format!("analysed chunk {}", payload.chunk_index),
                    completion_tokens: Some(50_000),
                    ..Default::default()
                })
            })
        }
    }

    /// Fails with a transient error on chunk 1 for the first `failures` calls.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    impl CompletionBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn complete<'a>(&'a self, payload: &'a OutboundPayload) -> BackendFuture<'a> {
            Box::pin(async move {
                if payload.chunk_index == 1 && self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                    return Err(BackendError::Api {
                        status: 503,
                        body: "overloaded".into(),
                    });
                }
                Ok(ChunkResponse::default())
            })
        }
    }

    fn jobs(n: usize, category: &str) -> Vec<ChunkJob> {
        (0..n)
            .map(|index| ChunkJob {
                index,
                category: category.into(),
                template: "Summarize the incidents in this slice.".into(),
                body: format!(r#"[{{"id":{index},"msg":"disk full on node-{index}"}}]"#),
            })
            .collect()
    }

    fn instant_retry(retries: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::ZERO,
            jitter: false,
            ..RetryConfig::with_retries(retries)
        }
    }

    fn transmitted_fragments(payload: &OutboundPayload) -> usize {
        payload
            .transmitted_parts()
            .filter(|p| matches!(p.kind, PartKind::Fragment(_)))
            .count()
    }

    #[tokio::test]
    async fn only_first_chunk_transmits_fragments() {
        let backend = RecordingBackend::default();
        let orchestrator = ChunkOrchestrator::new(&backend, RunConfig::default());
        let report = orchestrator
            .run("You are an SRE assistant.", jobs(5, "incident"))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.metrics.chunks, 5);
        assert!(report.metrics.saved_tokens > 0.0);

        let payloads = backend.payloads.lock().unwrap();
        let mut by_index: Vec<&OutboundPayload> = payloads.iter().collect();
        by_index.sort_by_key(|p| p.chunk_index);
        assert_eq!(transmitted_fragments(by_index[0]), 2);
        for payload in &by_index[1..] {
            assert_eq!(transmitted_fragments(payload), 0);
        }
    }

    #[tokio::test]
    async fn concurrent_run_sends_each_fragment_once() {
        let backend = RecordingBackend::default();
        let config = RunConfig::default().with_concurrency(4);
        let orchestrator = ChunkOrchestrator::new(&backend, config);
        let mut work = jobs(6, "incident");
        work.extend(jobs(6, "summary").into_iter().map(|mut j| {
            j.index += 6;
            j
        }));

        let report = orchestrator.run("You are an SRE assistant.", work).await.unwrap();
        assert_eq!(report.metrics.chunks, 12);

        let payloads = backend.payloads.lock().unwrap();
        let unsent_system = payloads
            .iter()
            .flat_map(|p| p.transmitted_parts())
            .filter(|p| p.kind == PartKind::Fragment(FragmentKind::SystemPrompt))
            .count();
        let unsent_templates = payloads
            .iter()
            .flat_map(|p| p.transmitted_parts())
            .filter(|p| p.kind == PartKind::Fragment(FragmentKind::InstructionTemplate))
            .count();
        assert_eq!(unsent_system, 1);
        assert_eq!(unsent_templates, 2);

        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn conservative_level_saves_nothing() {
        let config = RunConfig::default().with_level(OptimizationLevel::Conservative);
        let orchestrator = ChunkOrchestrator::new(&DryRunBackend, config);
        let report = orchestrator
            .run("You are an SRE assistant.", jobs(4, "incident"))
            .await
            .unwrap();
        assert_eq!(report.metrics.saved_tokens, 0.0);
        assert_eq!(
            report.metrics.tokens_with_caching,
            report.metrics.tokens_without_caching
        );
    }

    #[tokio::test]
    async fn blank_category_rejected_before_dispatch() {
        let backend = RecordingBackend::default();
        let orchestrator = ChunkOrchestrator::new(&backend, RunConfig::default());
        let mut work = jobs(3, "incident");
        work[2].category = "  ".into();

        let err = orchestrator.run("sys", work).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
        assert!(backend.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_retried() {
        let backend = FlakyBackend {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let config = RunConfig::default().with_retry(instant_retry(3));
        let orchestrator = ChunkOrchestrator::new(&backend, config);
        let report = orchestrator.run("sys", jobs(3, "incident")).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_reported_and_still_recorded() {
        let backend = FlakyBackend {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let config = RunConfig::default().with_retry(instant_retry(1));
        let orchestrator = ChunkOrchestrator::new(&backend, config);
        let report = orchestrator.run("sys", jobs(3, "incident")).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(report.failures[0].error.contains("503"));
        assert_eq!(report.metrics.chunks, 3);
        assert!(report.summary().contains("failed chunks: 1"));
    }

    #[tokio::test]
    async fn mismatched_templates_counted() {
        let orchestrator = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default());
        let mut work = jobs(3, "incident");
        work[1].template = "A different template".into();
        let report = orchestrator.run("sys", work).await.unwrap();
        assert_eq!(report.template_mismatches, 1);
        assert!(report.summary().contains("template mismatches: 1"));
    }

    #[tokio::test]
    async fn report_costs_reflect_savings() {
        let orchestrator = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default());
        let report = orchestrator
            .run(&"You are an SRE assistant. ".repeat(40), jobs(10, "incident"))
            .await
            .unwrap();
        assert!(report.estimated_cost_with_caching_usd < report.estimated_cost_without_caching_usd);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["backend"], "dry-run");
        assert_eq!(json["level"], "aggressive");
        assert_eq!(json["metrics"]["chunks"], 10);
    }

    #[tokio::test]
    async fn output_cost_from_completion_tokens() {
        let backend = RecordingBackend::default();
        let pricing = ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        };
        let orchestrator =
            ChunkOrchestrator::new(&backend, RunConfig::default().with_pricing(pricing));
        let report = orchestrator.run("sys", jobs(4, "incident")).await.unwrap();

        assert_eq!(report.completion_tokens, 200_000);
        assert!((report.estimated_output_cost_usd - 3.0).abs() < 1e-9);
        assert!(report.summary().contains("est. output cost: $3.0000"));
    }

    #[tokio::test]
    async fn dry_run_reports_no_output_cost() {
        let orchestrator = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default());
        let report = orchestrator.run("sys", jobs(2, "incident")).await.unwrap();
        assert_eq!(report.completion_tokens, 0);
        assert_eq!(report.estimated_output_cost_usd, 0.0);
        assert!(!report.summary().contains("output cost"));
    }

    #[test]
    fn jobs_from_chunks_keep_indices() {
        let chunks = vec![
            Chunk {
                index: 0,
                body: "[1]".into(),
                items: 1,
                estimated_tokens: 1,
            },
            Chunk {
                index: 1,
                body: "[2]".into(),
                items: 1,
                estimated_tokens: 1,
            },
        ];
        let jobs = ChunkJob::from_chunks(chunks, "incident", "T");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].index, 1);
        assert_eq!(jobs[1].body, "[2]");
        assert!(jobs.iter().all(|j| j.category == "incident" && j.template == "T"));
    }

    #[test]
    fn concurrency_floor_is_one() {
        assert_eq!(RunConfig::default().with_concurrency(0).concurrency, 1);
    }
}
