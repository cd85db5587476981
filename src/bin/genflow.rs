//! Genflow CLI Binary
//!
//! Operator interface over the generation workflow: run an attempt, inspect a task
//! record, recover after a restart, and sweep expired records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genflow::config::{ConfigLoader, GenflowConfig};
use genflow::logging::{init_logging, LoggingConfig};
use genflow::provider::{ChatMessage, ModelProviderClient, OpenAICompatibleClient};
use genflow::task::{
    GenerationOrchestrator, GenerationRunner, RecoveryOutcome, RunOutcome, TaskStore,
};
use genflow::validation::SchemaId;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "genflow")]
#[command(about = "Validated, race-free LLM generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    log_output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one validated attempt and print the outbound frame
    Generate {
        #[arg(long)]
        document: String,

        /// Response schema (questions, diagrams)
        #[arg(long, default_value = "questions")]
        schema: SchemaId,

        #[arg(long)]
        prompt: String,

        #[arg(long)]
        system: Option<String>,
    },
    /// Run one unvalidated streaming attempt, printing fragments as they arrive
    Stream {
        #[arg(long)]
        document: String,

        #[arg(long)]
        prompt: String,
    },
    /// Print the persisted task record for a document
    Status {
        #[arg(long)]
        document: String,
    },
    /// Reconcile every persisted record after a restart
    Recover,
    /// Delete settled records older than the retention window
    Sweep,
}

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Genflow CLI starting");

    if let Err(e) = run(cli) {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    if let Err(errors) = config.validate() {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Invalid configuration:\n  {}", joined.join("\n  "));
    }

    let store_path = &config.storage.path;
    let store = Arc::new(
        TaskStore::open(store_path)
            .with_context(|| format!("Failed to open task store at {}", store_path.display()))?,
    );
    let orchestrator = Arc::new(GenerationOrchestrator::new(store.clone(), &config.generation));

    match cli.command {
        Commands::Status { document } => {
            match store.get(&document)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No task record for '{}'", document),
            }
            Ok(())
        }
        Commands::Recover => {
            let outcomes = orchestrator.recover_all()?;
            for (document_id, outcome) in &outcomes {
                print_recovery(document_id, outcome);
            }
            println!("Recovered {} task record(s)", outcomes.len());
            store.flush()?;
            Ok(())
        }
        Commands::Sweep => {
            let removed = orchestrator.sweep()?;
            store.flush()?;
            println!("Removed {} expired task record(s)", removed);
            Ok(())
        }
        Commands::Generate {
            document,
            schema,
            prompt,
            system,
        } => {
            let runner = build_runner(orchestrator.clone(), &config)?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));

            recover_on_startup(&orchestrator);
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let outcome = runtime.block_on(runner.run_validated(&document, schema, messages))?;
            store.flush()?;

            match outcome {
                RunOutcome::Settled { frame: Some(frame), .. } => {
                    println!("{}", serde_json::to_string_pretty(&frame)?);
                }
                other => report_unsettled(&document, &other),
            }
            Ok(())
        }
        Commands::Stream { document, prompt } => {
            let runner = build_runner(orchestrator.clone(), &config)?;
            recover_on_startup(&orchestrator);
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let messages = vec![ChatMessage::user(prompt)];
            let outcome = runtime.block_on(runner.run_streaming(&document, messages, |fragment| {
                print!("{}", fragment);
                let _ = std::io::stdout().flush();
            }))?;
            store.flush()?;
            println!();
            if !matches!(outcome, RunOutcome::Settled { .. }) {
                report_unsettled(&document, &outcome);
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<GenflowConfig> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => ConfigLoader::load(&cli.workspace).context("Failed to load configuration")?,
    };
    Ok(config)
}

fn build_runner(
    orchestrator: Arc<GenerationOrchestrator>,
    config: &GenflowConfig,
) -> Result<GenerationRunner> {
    let client: Arc<dyn ModelProviderClient> =
        Arc::new(OpenAICompatibleClient::new(&config.provider)?);
    info!(
        provider = client.provider_name(),
        model = client.model_name(),
        "Model client ready"
    );
    Ok(GenerationRunner::new(orchestrator, client, config))
}

/// Records left `generating` by a crashed process must be settled before a new start.
fn recover_on_startup(orchestrator: &GenerationOrchestrator) {
    match orchestrator.recover_all() {
        Ok(outcomes) => {
            for (document_id, outcome) in &outcomes {
                if let Some(notice) = outcome.notice() {
                    warn!(
                        document_id = %document_id,
                        message = %notice.message,
                        "Task needs attention"
                    );
                }
            }
        }
        Err(e) => warn!(error = %e, "Startup recovery failed"),
    }
}

fn print_recovery(document_id: &str, outcome: &RecoveryOutcome) {
    match outcome {
        RecoveryOutcome::RecoveredAsCompleted => println!(
            "{}: interrupted attempt had finished content, marked completed",
            document_id
        ),
        RecoveryOutcome::Interrupted(notice) | RecoveryOutcome::PreviouslyFailed(notice) => {
            println!("{}: {} (action: retry)", document_id, notice.message)
        }
        RecoveryOutcome::Restored(phase) => println!("{}: {}", document_id, phase),
        RecoveryOutcome::InFlight => println!("{}: generating", document_id),
        RecoveryOutcome::NotFound => {}
    }
}

fn report_unsettled(document_id: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::AlreadyRunning(handle) => eprintln!(
            "Generation for '{}' is already in progress ({})",
            document_id, handle.request_id
        ),
        RunOutcome::Cancelled => eprintln!("Generation for '{}' was cancelled", document_id),
        RunOutcome::Superseded => {
            eprintln!("Generation for '{}' was superseded by a newer attempt", document_id)
        }
        RunOutcome::Settled { phase, .. } => {
            eprintln!("Generation for '{}' settled as {}", document_id, phase)
        }
    }
}

/// Build logging configuration from CLI args, environment, and config file
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    if !cli.verbose {
        return LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        };
    }

    let mut config = load_config(cli)
        .map(|c| c.logging)
        .unwrap_or_default();

    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }

    config
}
