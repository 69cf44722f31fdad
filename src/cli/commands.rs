//! CLI command definitions for council.
//!
//! `analyze` runs the two-round committee pipeline on a query, `compare`
//! runs prompt templates side by side, and `show` prints a saved run log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::checkpoint::{load_run_log, RunLogDocument};
use crate::llm::{LiteLlmClient, LlmProvider, OpenRouterProvider};
use crate::pipeline::{
    AnalysisPipeline, CancelSignal, PipelineConfig, PipelineEvent, PipelineStage,
    PromptComparison,
};
use crate::prompts::FsTemplateLoader;

/// Default model when talking to OpenRouter.
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Templates compared when none are given.
const DEFAULT_COMPARE_TEMPLATES: &str = "cotv1.md,cotv2.md";

/// Two-round committee analysis with LLM agents.
#[derive(Parser)]
#[command(name = "council")]
#[command(about = "Answer a query with a two-round committee of LLM agents")]
#[command(version)]
#[command(
    long_about = "council fans a query out to a batch of agents, distils their answers, runs a second batch on the distilled insights, and writes a final answer.\n\nEvery stage is saved to a JSON run log.\n\nExample usage:\n  council analyze \"What are the trade-offs of event sourcing?\" --agents 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the committee pipeline on a query.
    #[command(alias = "run")]
    Analyze(AnalyzeArgs),

    /// Run several prompt templates on the same query and compare the answers.
    Compare(CompareArgs),

    /// Print the stages of a saved run log.
    Show(ShowArgs),
}

/// Arguments for `council analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// The query to analyze.
    #[arg(required_unless_present = "query_file")]
    pub query: Option<String>,

    /// Read the query from a file instead.
    #[arg(short = 'f', long, conflicts_with = "query")]
    pub query_file: Option<PathBuf>,

    /// YAML configuration file. `COUNCIL_*` variables and flags override it.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// LLM model to use (OpenRouter format).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Agents per batch.
    #[arg(short = 'n', long)]
    pub agents: Option<usize>,

    /// Agent prompt template, relative to the prompts directory.
    #[arg(short = 't', long)]
    pub template: Option<String>,

    /// Directory containing prompt templates.
    #[arg(long)]
    pub prompts_dir: Option<PathBuf>,

    /// Directory run logs are written to.
    #[arg(short = 'o', long)]
    pub results_dir: Option<PathBuf>,

    /// Per-agent timeout in seconds.
    #[arg(long)]
    pub agent_timeout: Option<u64>,

    /// Maximum agents calling the model at once.
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Output JSON to stdout instead of interactive progress.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `council compare`.
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// The query every template is run on.
    pub query: String,

    /// Comma-separated template names.
    #[arg(short = 't', long, value_delimiter = ',', default_value = DEFAULT_COMPARE_TEMPLATES)]
    pub templates: Vec<String>,

    /// Directory containing prompt templates.
    #[arg(long, default_value = "prompts")]
    pub prompts_dir: PathBuf,

    /// LLM model to use (OpenRouter format).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `council show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Path to a run log written by `council analyze`.
    pub log: PathBuf,

    /// Print the raw document as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// JSON summary printed by `council analyze --json`.
#[derive(Debug, Serialize)]
struct AnalyzeOutput {
    run_id: String,
    final_response: String,
    execution_time_secs: f64,
    log: String,
}

/// JSON entry printed by `council compare --json`.
#[derive(Debug, Serialize)]
struct CompareOutput {
    template: String,
    response: Option<String>,
    error: Option<String>,
    execution_time_ms: u64,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze(args) => run_analyze_command(args).await,
        Commands::Compare(args) => run_compare_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
    }
}

// ============================================================================
// Analyze
// ============================================================================

async fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let query = read_query(&args)?;
    let config = resolve_config(&args)?;
    let provider = build_llm_client(args.api_key.clone(), args.model.clone())?;

    let (tx, rx) = mpsc::channel(64);
    let pipeline = AnalysisPipeline::new(config, provider)?.with_events(tx);
    spawn_interrupt_handler(pipeline.cancel_signal());

    let printer = tokio::spawn(print_progress(rx, args.json));
    let result = pipeline.run_analysis(&query).await;
    // Closes the event channel so the printer drains and exits.
    drop(pipeline);
    let _ = printer.await;

    let result = result?;
    if args.json {
        let output = AnalyzeOutput {
            run_id: result.run_id,
            final_response: result.final_text,
            execution_time_secs: result.elapsed.as_secs_f64(),
            log: result.run_log,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!("Final Analysis:");
        println!("{}", result.final_text);
        println!();
        println!("Total execution time: {:.2}s", result.elapsed.as_secs_f64());
        println!("Detailed results saved to: {}", result.run_log);
    }

    Ok(())
}

fn read_query(args: &AnalyzeArgs) -> anyhow::Result<String> {
    let query = match (&args.query, &args.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read query file {}: {}", path.display(), e)
        })?,
        (None, None) => anyhow::bail!("A query or --query-file is required"),
    };

    let query = query.trim().to_string();
    if query.is_empty() {
        anyhow::bail!("Query cannot be empty");
    }
    Ok(query)
}

fn resolve_config(args: &AnalyzeArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;

    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(agents) = args.agents {
        config.num_agents = agents;
    }
    if let Some(template) = &args.template {
        config.template_name = template.clone();
    }
    if let Some(dir) = &args.prompts_dir {
        config.prompts_dir = dir.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(secs) = args.agent_timeout {
        config.unit_timeout_secs = Some(secs);
    }
    if let Some(limit) = args.max_in_flight {
        config.max_in_flight = Some(limit);
    }

    config.validate()?;
    Ok(config)
}

fn spawn_interrupt_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling analysis");
            cancel.cancel();
        }
    });
}

async fn print_progress(mut rx: mpsc::Receiver<PipelineEvent>, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if quiet {
            continue;
        }
        match event {
            PipelineEvent::StageStarted { stage, .. } => {
                if !matches!(
                    stage,
                    PipelineStage::Init | PipelineStage::Done | PipelineStage::Failed
                ) {
                    println!("{}", stage.description());
                }
            }
            PipelineEvent::BatchCompleted {
                successes,
                failures,
                elapsed_ms,
                ..
            } => {
                println!(
                    "  {}/{} agents succeeded ({:.2}s)",
                    successes,
                    successes + failures,
                    elapsed_ms as f64 / 1000.0
                );
            }
            PipelineEvent::CheckpointFailed { stage, error, .. } => {
                eprintln!("Error saving results for stage {}: {}", stage, error);
            }
            PipelineEvent::RunFailed { error, .. } => {
                eprintln!("Analysis failed: {}", error);
            }
            _ => {}
        }
    }
}

// ============================================================================
// Compare
// ============================================================================

async fn run_compare_command(args: CompareArgs) -> anyhow::Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let provider = build_llm_client(args.api_key.clone(), args.model.clone())?;
    let templates = Arc::new(FsTemplateLoader::new(args.prompts_dir.clone()));
    let comparison =
        PromptComparison::new(provider, templates).with_model(args.model.clone().unwrap_or_default());

    let entries = comparison.compare(&args.templates, query).await?;

    if args.json {
        let output: Vec<CompareOutput> = entries
            .into_iter()
            .map(|entry| {
                let (response, error) = match entry.outcome {
                    Ok(text) => (Some(text), None),
                    Err(e) => (None, Some(e)),
                };
                CompareOutput {
                    template: entry.template,
                    response,
                    error,
                    execution_time_ms: entry.elapsed.as_millis() as u64,
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for entry in entries {
        println!("=== {} ===", entry.template);
        match entry.outcome {
            Ok(text) => println!("{}", text),
            Err(e) => println!("Error: {}", e),
        }
        println!("Execution time: {}", format_elapsed(entry.elapsed));
        println!();
    }

    Ok(())
}

/// Formats a duration as seconds with millisecond detail, e.g. `1.23s (1234ms)`.
fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s ({}ms)", elapsed.as_secs_f64(), elapsed.as_millis())
}

// ============================================================================
// Show
// ============================================================================

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let document = load_run_log(&args.log).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("Run log: {}", args.log.display());
    for (stage, timestamp, summary) in summarize_run_log(&document) {
        println!();
        println!("[{}] {}", timestamp, stage);
        println!("{}", summary);
    }

    Ok(())
}

/// Stage, RFC3339 timestamp and summary for every entry, oldest first.
fn summarize_run_log(document: &RunLogDocument) -> Vec<(String, String, String)> {
    let mut entries: Vec<_> = document.iter().collect();
    entries.sort_by_key(|(_, entry)| entry.timestamp);

    entries
        .into_iter()
        .map(|(stage, entry)| {
            (
                stage.clone(),
                entry.timestamp.to_rfc3339(),
                summarize_stage(stage, &entry.data),
            )
        })
        .collect()
}

fn summarize_stage(stage: &str, data: &Value) -> String {
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);

    let summary = if stage.ends_with("_batch") {
        let successes = data
            .get("successful_responses")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let errors = data
            .get("errors")
            .and_then(Value::as_array)
            .map(|e| e.len())
            .unwrap_or(0);
        let secs = data
            .get("execution_time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Some(format!(
            "{} successful, {} failed ({:.2}s)",
            successes, errors, secs
        ))
    } else if stage.starts_with("evaluation_") {
        text("evaluation")
    } else {
        match stage {
            "initial_query" => text("query"),
            "final_response" => text("response"),
            "error" => text("error"),
            _ => None,
        }
    };

    summary.unwrap_or_else(|| data.to_string())
}

// ============================================================================
// Helpers
// ============================================================================

/// Builds the LLM provider: OpenRouter when an OpenRouter key is available,
/// otherwise a LiteLLM client configured from the environment.
fn build_llm_client(
    api_key: Option<String>,
    model: Option<String>,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = openrouter_key(api_key, |name| std::env::var(name).ok()) {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        info!(model = %model, "Using OpenRouter with specified API key");
        Ok(Arc::new(OpenRouterProvider::with_model(key, model)))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key, set \
                 OPENROUTER_API_KEY, or set LITELLM_API_BASE for a LiteLLM proxy.",
                e
            )
        })?))
    }
}

/// Resolves the OpenRouter key from the flag or `OPENROUTER_API_KEY`.
///
/// `LITELLM_API_KEY` belongs to the LiteLLM proxy and is left for
/// [`LiteLlmClient::from_env`].
fn openrouter_key(
    api_key: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    api_key
        .or_else(|| lookup("OPENROUTER_API_KEY"))
        .filter(|key| !key.is_empty())
}
