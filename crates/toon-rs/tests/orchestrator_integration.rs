//! End-to-end tests: JSON file on disk -> chunks -> orchestrated dry run.

use std::io::Write;

use toon_rs::prelude::*;

const SYSTEM_PROMPT: &str = "You are an SRE assistant. Classify each event by severity \
and name the most likely root cause. Answer in compact JSON.";
const TEMPLATE: &str = "For every incident in the slice below, return \
{\"id\", \"severity\", \"root_cause\"}. Do not repeat the input.";

/// Helper: write a JSON array of `n` incident records to a temp file.
fn incident_file(n: usize) -> tempfile::NamedTempFile {
    let records: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            serde_json::json!({
                "id": i,
                "service": format!("api-{}", i % 7),
                "message": format!("p99 latency above threshold on shard {i}"),
            })
        })
        .collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::Value::Array(records)).unwrap();
    file
}

fn load_jobs(file: &tempfile::NamedTempFile, chunk_tokens: u64) -> Vec<ChunkJob> {
    let input = std::fs::read_to_string(file.path()).unwrap();
    let chunks = JsonChunker::new(chunk_tokens)
        .unwrap()
        .chunk_str(&input)
        .unwrap();
    ChunkJob::from_chunks(chunks, "incident", TEMPLATE)
}

#[tokio::test]
async fn dry_run_over_file_saves_fragment_tokens() {
    let file = incident_file(200);
    let jobs = load_jobs(&file, 400);
    let chunk_count = jobs.len() as u64;
    assert!(chunk_count > 1);

    let report = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default())
        .run(SYSTEM_PROMPT, jobs)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.metrics.chunks, chunk_count);

    // Every chunk after the first omits both fragments.
    let fragment_tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(TEMPLATE);
    assert_eq!(
        report.metrics.saved_tokens,
        (fragment_tokens * (chunk_count - 1)) as f64
    );
    assert!(report.metrics.tokens_with_caching <= report.metrics.tokens_without_caching);
    assert!(report.metrics.saved_ratio > 0.0 && report.metrics.saved_ratio < 1.0);
}

#[tokio::test]
async fn levels_order_savings() {
    let file = incident_file(120);
    let mut saved = Vec::new();
    for level in [
        OptimizationLevel::Conservative,
        OptimizationLevel::Balanced,
        OptimizationLevel::Aggressive,
    ] {
        let report = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default().with_level(level))
            .run(SYSTEM_PROMPT, load_jobs(&file, 400))
            .await
            .unwrap();
        saved.push(report.metrics.saved_tokens);
    }
    assert_eq!(saved[0], 0.0);
    assert!(saved[1] > saved[0]);
    assert!(saved[2] > saved[1]);
}

#[tokio::test]
async fn concurrent_and_sequential_runs_agree() {
    let file = incident_file(150);

    let sequential = ChunkOrchestrator::new(&DryRunBackend, RunConfig::default())
        .run(SYSTEM_PROMPT, load_jobs(&file, 300))
        .await
        .unwrap();
    let concurrent =
        ChunkOrchestrator::new(&DryRunBackend, RunConfig::default().with_concurrency(8))
            .run(SYSTEM_PROMPT, load_jobs(&file, 300))
            .await
            .unwrap();

    assert_eq!(sequential.metrics, concurrent.metrics);
}

#[test]
fn manual_session_matches_documented_scenario() {
    let mut cache = PromptFragmentCache::new(SYSTEM_PROMPT);
    for chunk in 0..24 {
        let resolved = cache.resolve_chunk("incident", TEMPLATE).unwrap();
        assert_eq!(resolved.system.already_sent, chunk > 0);
        let actual = if chunk == 0 { 1500.0 } else { 400.0 };
        cache.record_chunk(1500.0, actual).unwrap();
    }
    let metrics = cache.metrics();
    assert_eq!(metrics.tokens_without_caching, 36_000.0);
    assert_eq!(metrics.tokens_with_caching, 10_700.0);
    assert_eq!(metrics.saved_tokens, 25_300.0);
}
