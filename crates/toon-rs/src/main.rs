//! Chunk an oversized JSON input and report prompt-fragment savings.
//!
//! Runs as a dry run by default: nothing leaves the machine and the report
//! shows what caching the system prompt and instruction template would save.
//! With `--send`, chunks go to OpenRouter; the API key is read from the
//! `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Measure savings for an incident dump
//! toon --input incidents.json --category incident \
//!   --system-prompt "You are an SRE assistant." \
//!   --template-file prompts/incident.md
//!
//! # Compare levels
//! toon --input incidents.json --category incident \
//!   --system-prompt-file prompts/system.md --template "Summarize." \
//!   --level balanced --json
//!
//! # Send for real, four chunks in flight
//! cat incidents.json | toon --input - --category incident \
//!   --system-prompt-file prompts/system.md --template-file prompts/incident.md \
//!   --send --concurrency 4 --retries 3
//! ```

use clap::Parser;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use toon_rs::api::openrouter::DEFAULT_MODEL;
use toon_rs::api::{
    CompletionBackend, DryRunBackend, OpenRouterBackend, RetryConfig, pricing_for_model,
};
use toon_rs::chunker::{DEFAULT_CHUNK_TOKENS, JsonChunker};
use toon_rs::level::OptimizationLevel;
use toon_rs::orchestrator::{ChunkJob, ChunkOrchestrator, RunConfig};
use toon_rs::tokens::TokenEstimator;
use tracing_subscriber::EnvFilter;

/// Chunk an oversized JSON input and report prompt-fragment savings.
#[derive(Parser)]
#[command(name = "toon")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// JSON input file (`-` reads stdin)
    #[arg(long)]
    input: String,

    /// Category label the chunks are analysed under
    #[arg(long)]
    category: String,

    // ── Fragments ──────────────────────────────────────────────
    /// System prompt text
    #[arg(long, conflicts_with = "system_prompt_file")]
    system_prompt: Option<String>,

    /// File containing the system prompt
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// Instruction template text for the category
    #[arg(long, conflicts_with = "template_file")]
    template: Option<String>,

    /// File containing the instruction template
    #[arg(long)]
    template_file: Option<PathBuf>,

    // ── Chunking / caching ─────────────────────────────────────
    /// Token budget per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_TOKENS)]
    chunk_tokens: u64,

    /// Which fragment kinds may be served from cache
    #[arg(long, value_enum, default_value_t = OptimizationLevel::Aggressive)]
    level: OptimizationLevel,

    /// Characters per token used for size estimates
    #[arg(long)]
    chars_per_token: Option<f64>,

    // ── Dispatch ───────────────────────────────────────────────
    /// Send chunks to OpenRouter instead of a dry run
    #[arg(long)]
    send: bool,

    /// Model to use (also selects pricing for the report)
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Maximum tokens per response
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    /// Maximum chunk requests in flight
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Retries for transient API errors
    #[arg(long, default_value_t = 0)]
    retries: u32,

    // ── Output ─────────────────────────────────────────────────
    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).map_err(|e| format!("failed to read {input}: {e}"))
    }
}

fn read_fragment(
    inline: Option<String>,
    file: Option<PathBuf>,
    what: &str,
) -> Result<String, String> {
    match (inline, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| format!("failed to read {what} from {}: {e}", path.display())),
        (None, None) => Err(format!(
            "a {what} is required (--{flag} or --{flag}-file)",
            flag = what.replace(' ', "-")
        )),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<bool, String> {
    let system_prompt = read_fragment(cli.system_prompt, cli.system_prompt_file, "system prompt")?;
    let template = read_fragment(cli.template, cli.template_file, "template")?;
    let input = read_input(&cli.input)?;

    let mut estimator = TokenEstimator::new();
    if let Some(cpt) = cli.chars_per_token {
        estimator = estimator.with_chars_per_token(cpt);
    }

    let chunks = JsonChunker::new(cli.chunk_tokens)
        .map_err(|e| e.to_string())?
        .with_estimator(estimator)
        .chunk_str(&input)
        .map_err(|e| e.to_string())?;
    let jobs = ChunkJob::from_chunks(chunks, &cli.category, &template);

    let config = RunConfig::default()
        .with_level(cli.level)
        .with_concurrency(cli.concurrency)
        .with_retry(RetryConfig::with_retries(cli.retries))
        .with_estimator(estimator)
        .with_pricing(pricing_for_model(&cli.model));

    let openrouter;
    let backend: &dyn CompletionBackend = if cli.send {
        openrouter = OpenRouterBackend::from_env(&cli.model)
            .map_err(|e| e.to_string())?
            .with_max_tokens(cli.max_tokens);
        &openrouter
    } else {
        &DryRunBackend
    };

    let report = ChunkOrchestrator::new(backend, config)
        .run(&system_prompt, jobs)
        .await
        .map_err(|e| e.to_string())?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("failed to serialize report: {e}"))?;
        println!("{json}");
    } else {
        if cli.send {
            for result in &report.results {
                println!("--- chunk {} ---\n{}\n", result.index, result.response.content);
            }
        }
        println!("{}", report.summary());
    }

    Ok(report.is_success())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
