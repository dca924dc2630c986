//! CLI command definitions for flowgen.
//!
//! One primary command: `generate` takes a pipeline request and scaffolds a
//! Nextflow project into the output directory. `stages` lists the built-in
//! stage sequence.

use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    default_stages, CancellationFlag, PipelineConfig, PipelineEvent, PipelineExecutor, RunReport,
};
use crate::session::Session;

/// Default output directory for scaffolded projects.
const DEFAULT_OUTPUT_DIR: &str = "./generated-pipeline";

/// LLM-driven Nextflow project scaffolder.
#[derive(Parser)]
#[command(name = "flowgen")]
#[command(about = "Scaffold a Nextflow pipeline project from a natural-language request")]
#[command(version)]
#[command(
    long_about = "flowgen runs a fixed sequence of LLM stages (plan, structure, tests, config, \
workflow) that scaffold a complete Nextflow project.\n\nExample usage:\n  flowgen generate \
\"Create a FASTQC quality-control pipeline\" --output ./out"
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
    /// Scaffold a Nextflow project from a request.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// List the built-in stage sequence.
    Stages,
}

/// Arguments for `flowgen generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// The pipeline request, e.g. "Create a FASTQC quality-control pipeline".
    /// Omit when using --prompt-file.
    pub prompt: Option<String>,

    /// Read the pipeline request from a file instead.
    #[arg(long, conflicts_with = "prompt")]
    pub prompt_file: Option<String>,

    /// Directory of reference input data; its file names are listed in the
    /// request so the planner can account for them.
    #[arg(long)]
    pub input_data: Option<String>,

    /// Output directory the project is scaffolded under.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: String,

    /// LLM model to use for all stages (defaults to the provider default).
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Maximum model/tool rounds per stage.
    #[arg(long)]
    pub max_tool_rounds: Option<usize>,

    /// Output a JSON report to stdout instead of a human-readable summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// Lets main.rs read log_level before running commands.
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
        Commands::Generate(args) => run_generate_command(args).await,
        Commands::Stages => {
            run_stages_command();
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateOutput {
    status: String,
    session_id: String,
    project_name: Option<String>,
    process_name: Option<String>,
    files_created: Vec<String>,
    events_in_log: usize,
    duration_ms: u64,
}

async fn run_generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let request = resolve_prompt(&args)?;
    fs::create_dir_all(&args.output)?;

    let mut config = PipelineConfig::from_env(Path::new(&args.output))?;
    if let Some(model) = args.model {
        config = config.with_model(model);
    }
    if let Some(rounds) = args.max_tool_rounds {
        config = config.with_max_tool_rounds(rounds);
    }

    let client = LiteLlmClient::from_env()?;
    if !client.has_api_key() {
        warn!("LITELLM_API_KEY not set; requests will likely be rejected");
    }
    let provider: Arc<dyn LlmProvider> = Arc::new(client);

    let executor = PipelineExecutor::new(provider, config)?;
    let session = Session::new();
    info!(session = %session.id, output = %args.output, "starting generation");

    let (tx, mut rx) = mpsc::channel(64);
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::StageStarted { stage, ordinal, total } => {
                    info!("[{}/{}] {} running", ordinal + 1, total, stage);
                }
                PipelineEvent::StageCompleted { stage, tool_calls, .. } => {
                    info!("[done] {} ({} tool calls)", stage, tool_calls);
                }
                PipelineEvent::StageFailed { stage, error } => {
                    warn!("[fail] {}: {}", stage, error);
                }
                PipelineEvent::CompactionApplied { start, end } => {
                    info!("compacted context events {}..={}", start, end);
                }
                PipelineEvent::PipelineCompleted { stages_run } => {
                    info!("pipeline completed: {} stages", stages_run);
                }
            }
        }
    });

    let result = executor
        .run(&session, &request, tx, &CancellationFlag::new())
        .await;
    let _ = reporter.await;

    let report = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&json_output(&report))?);
    } else {
        print_report(&report, &args.output);
    }
    Ok(())
}

fn resolve_prompt(args: &GenerateArgs) -> anyhow::Result<String> {
    let prompt = if let Some(path) = &args.prompt_file {
        let text = fs::read_to_string(path)?;
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() {
            return Err(anyhow::anyhow!("Prompt file is empty: {}", path));
        }
        trimmed
    } else {
        match &args.prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt.trim().to_string(),
            _ => {
                return Err(anyhow::anyhow!(
                    "No request given; pass it as an argument or via --prompt-file"
                ))
            }
        }
    };

    let Some(data_dir) = &args.input_data else {
        return Ok(prompt);
    };
    let mut files: Vec<String> = fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(format!(
        "Generate Nextflow workflow based on:\n\nPrompt: {}\n\nInput files: {}",
        prompt,
        files.join(", ")
    ))
}

fn json_output(report: &RunReport) -> GenerateOutput {
    GenerateOutput {
        status: "completed".to_string(),
        session_id: report.session_id.to_string(),
        project_name: report.project_state.project_name.clone(),
        process_name: report.project_state.process_name.clone(),
        files_created: report.project_state.manifest.iter().cloned().collect(),
        events_in_log: report.events_in_log,
        duration_ms: report.duration_ms,
    }
}

fn print_report(report: &RunReport, output: &str) {
    println!("Project scaffolded under {}", output);
    if let Some(name) = &report.project_state.project_name {
        println!("  project: {}", name);
    }
    if let Some(name) = &report.project_state.process_name {
        println!("  process: {}", name);
    }
    for path in &report.project_state.manifest {
        println!("  created: {}", path);
    }
    println!();
    println!("{}", report.final_summary);
    println!();
    println!("Completed in {} ms", report.duration_ms);
}

fn run_stages_command() {
    for spec in default_stages() {
        let tools = if spec.allowed_tools.is_empty() {
            "no tools".to_string()
        } else {
            spec.allowed_tools.join(", ")
        };
        println!(
            "{}. {} -> {} ({})",
            spec.ordinal + 1,
            spec.id,
            spec.output_key,
            tools
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_prompt_resolution_prefers_inline() {
        let args = GenerateArgs {
            prompt: Some("  build a pipeline  ".to_string()),
            prompt_file: None,
            input_data: None,
            output: DEFAULT_OUTPUT_DIR.to_string(),
            model: None,
            max_tool_rounds: None,
            json: false,
        };
        assert_eq!(resolve_prompt(&args).unwrap(), "build a pipeline");
    }

    #[test]
    fn test_input_data_listing_is_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.fastq"), "").unwrap();
        std::fs::write(dir.path().join("a.fastq"), "").unwrap();

        let args = GenerateArgs {
            prompt: Some("run qc".to_string()),
            prompt_file: None,
            input_data: Some(dir.path().to_string_lossy().into_owned()),
            output: DEFAULT_OUTPUT_DIR.to_string(),
            model: None,
            max_tool_rounds: None,
            json: false,
        };
        let resolved = resolve_prompt(&args).unwrap();
        assert!(resolved.contains("Prompt: run qc"));
        assert!(resolved.contains("Input files: a.fastq, b.fastq"));
    }

    #[test]
    fn test_missing_prompt_is_an_error() {
        let args = GenerateArgs {
            prompt: None,
            prompt_file: None,
            input_data: None,
            output: DEFAULT_OUTPUT_DIR.to_string(),
            model: None,
            max_tool_rounds: None,
            json: false,
        };
        assert!(resolve_prompt(&args).is_err());
    }
}
