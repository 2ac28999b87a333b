//! Review a code change with an agentic model.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Review the working tree
//! git diff | critic --diff -
//!
//! # With pre-gathered context and a settings file
//! critic --diff change.patch --snippets context.json --settings critic.json
//!
//! # Show what would be sent, without calling the model
//! critic --diff change.patch --dry-run
//! ```

use clap::Parser;
use critic_rs::agent::SharedSettings;
use critic_rs::prelude::*;
use critic_rs::review::prompt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Review a code change with an agentic model.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "critic")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Unified diff to review, or `-` for stdin
    #[arg(long)]
    diff: String,

    /// JSON array of context snippets ({id, type, content, relevance})
    #[arg(long)]
    snippets: Option<PathBuf>,

    /// Extra reviewer instructions
    #[arg(long)]
    instructions: Option<String>,

    // ── Settings ───────────────────────────────────────────────
    /// JSON settings file; missing fields take their defaults
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Model to use (overrides the settings file)
    #[arg(long)]
    model: Option<String>,

    /// Iteration ceiling for the main analysis
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Subagents the review may spawn
    #[arg(long)]
    max_subagents: Option<u32>,

    // ── Output ─────────────────────────────────────────────────
    /// Print the fitted prompt and token allocation, then exit
    #[arg(long)]
    dry_run: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_diff(source: &str) -> Result<String, String> {
    if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read diff from stdin: {e}"))?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).map_err(|e| format!("failed to read diff '{source}': {e}"))
}

fn read_snippets(path: &Path) -> Result<Vec<ContextSnippet>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read snippets '{}': {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid snippets '{}': {e}", path.display()))
}

fn load_settings(cli: &Cli) -> Result<AgentSettings, String> {
    let mut settings = match &cli.settings {
        Some(path) => AgentSettings::load(path).map_err(|e| e.to_string())?,
        None => AgentSettings::default(),
    };
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if let Some(n) = cli.max_iterations {
        settings.max_iterations = n;
    }
    if let Some(n) = cli.max_subagents {
        settings.max_subagents = n;
    }
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn build_request(cli: &Cli) -> Result<ReviewRequest, String> {
    let diff = read_diff(&cli.diff)?;
    if diff.trim().is_empty() {
        return Err("the diff is empty".into());
    }
    let mut request = ReviewRequest::new(diff);
    if let Some(path) = &cli.snippets {
        request = request.with_snippets(read_snippets(path)?);
    }
    if let Some(text) = &cli.instructions {
        request = request.with_instructions(text.clone());
    }
    Ok(request)
}

fn dry_run(request: &ReviewRequest, settings: &AgentSettings) -> Result<(), String> {
    let counter: Arc<dyn TokenCounter> = Arc::new(critic_rs::context::CharEstimateCounter::new());
    let prepared = prompt::prepare(request, settings, counter).map_err(|e| e.to_string())?;
    let allocation =
        serde_json::to_string_pretty(&prepared.allocation).map_err(|e| e.to_string())?;
    println!("{}", prepared.user_prompt());
    println!("\n---\n{allocation}");
    for (ty, action) in &prepared.actions {
        eprintln!("  {ty}: {action:?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let inputs = load_settings(&cli).and_then(|s| Ok((build_request(&cli)?, s)));
    let (request, settings) = match inputs {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if cli.dry_run {
        if let Err(e) = dry_run(&request, &settings) {
            eprintln!("Error: {e}");
            process::exit(1);
        }
        return;
    }

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            process::exit(1);
        }
    };

    let model = settings.model.clone();
    let settings = Arc::new(SharedSettings::new(settings));
    let client = match OpenRouterClient::new(api_key, &model, settings.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            process::exit(1);
        }
    };

    let session = ReviewSession::new(Arc::new(client), settings)
        .with_progress(Arc::new(LoggingProgress));

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping the review...");
            token.cancel();
        }
    });

    match session.run(request).await {
        Ok(report) => {
            print!("{}", report.render());
            eprintln!(
                "[{}] {} after {} iteration(s), {} tool call(s), {} subagent(s)",
                report.trace_id,
                report.outcome,
                report.iterations,
                report.tool_calls.len(),
                report.subagents_spawned,
            );
            if !report.is_complete() {
                process::exit(1);
            }
        }
        Err(AgentError::ModelUnsupported(msg)) => {
            eprintln!(
                "Error: model '{model}' cannot run a review: {msg}\n\
                 Choose a model that supports tool calling with --model."
            );
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
