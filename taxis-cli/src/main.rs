//! Taxis CLI - Run composition patterns against scripted model replies

mod definition;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use taxis_core::config::TaxisConfig;
use taxis_core::llm::{CancellableInvoker, ScriptedInvoker};
use taxis_core::workflow::ExecutionTrace;

use definition::{
    ChainDefinition, FanOutDefinition, OrchestratorDefinition, RefineDefinition, RouterDefinition,
};

#[derive(Parser)]
#[command(name = "taxis")]
#[command(about = "Taxis composition patterns CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to taxis.toml, TAXIS_CONFIG_PATH and TAXIS_* variables)
    #[arg(short, long, global = true, env = "TAXIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Composer definition (TOML, YAML or JSON)
    #[arg(short, long)]
    definition: PathBuf,

    /// Script of model replies (JSON)
    #[arg(short, long)]
    script: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt chain
    Chain {
        #[command(flatten)]
        run: RunArgs,

        /// Initial input
        input: String,
    },
    /// Run one prompt over many inputs
    Parallel {
        #[command(flatten)]
        run: RunArgs,

        /// Inputs, one call each
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Classify an input and answer it with the matching route
    Route {
        #[command(flatten)]
        run: RunArgs,

        /// Skip classification and use this route
        #[arg(long)]
        category: Option<String>,

        input: String,
    },
    /// Decompose a task and run one worker per subtask
    Orchestrate {
        #[command(flatten)]
        run: RunArgs,

        task: String,
    },
    /// Generate and evaluate until a solution passes
    Refine {
        #[command(flatten)]
        run: RunArgs,

        /// Exit with an error when no solution is accepted
        #[arg(long)]
        require_accept: bool,

        task: String,
    },
    /// Version information
    Version,
}

impl Commands {
    /// Whether the command reads `TaxisConfig`
    fn needs_config(&self) -> bool {
        !matches!(self, Commands::Version)
    }
}

#[derive(Serialize)]
struct Report<T: Serialize> {
    result: T,
    trace: ExecutionTrace,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ItemReport {
    Response(taxis_core::workflow::Response),
    Error(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file must not stop `taxis version`
    if !cli.command.needs_config() {
        print_version();
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight calls");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Version => print_version(),
        Commands::Chain { run, input } => {
            let chain = definition::load::<ChainDefinition>(&run.definition)?.build(&config)?;
            let invoker = invoker(&run.script, &token)?;
            let (result, trace) = chain.execute(&input, &invoker).await?;
            print(&Report { result, trace })?;
        }
        Commands::Parallel { run, inputs } => {
            let fan_out = definition::load::<FanOutDefinition>(&run.definition)?.build(&config)?;
            let invoker = invoker(&run.script, &token)?;
            let (outcome, trace) = fan_out.execute(&inputs, &invoker).await?;
            let result: Vec<ItemReport> = outcome
                .into_results()
                .into_iter()
                .map(|r| match r {
                    Ok(response) => ItemReport::Response(response),
                    Err(e) => ItemReport::Error(e.to_string()),
                })
                .collect();
            print(&Report { result, trace })?;
        }
        Commands::Route {
            run,
            category,
            input,
        } => {
            let router = definition::load::<RouterDefinition>(&run.definition)?.build(&config)?;
            let invoker = invoker(&run.script, &token)?;
            let (result, trace) = match category {
                Some(category) => {
                    router
                        .execute_with_category(&category, &input, &invoker)
                        .await?
                }
                None => router.execute(&input, &invoker).await?,
            };
            print(&Report { result, trace })?;
        }
        Commands::Orchestrate { run, task } => {
            let orchestrator =
                definition::load::<OrchestratorDefinition>(&run.definition)?.build(&config)?;
            let invoker = invoker(&run.script, &token)?;
            let (result, trace) = orchestrator.execute(&task, &invoker).await?;
            print(&Report { result, trace })?;
        }
        Commands::Refine {
            run,
            require_accept,
            task,
        } => {
            let optimizer = definition::load::<RefineDefinition>(&run.definition)?.build(&config)?;
            let invoker = invoker(&run.script, &token)?;
            let (result, trace) = optimizer.execute(&task, &invoker).await?;
            let result = if require_accept {
                result.into_accepted()?
            } else {
                result
            };
            print(&Report { result, trace })?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TaxisConfig> {
    let config = match path {
        Some(path) => TaxisConfig::from_file(path)?,
        None => TaxisConfig::load()?,
    };
    Ok(config)
}

fn print_version() {
    println!("taxis {}", env!("CARGO_PKG_VERSION"));
    println!("taxis-core {}", taxis_core::VERSION);
}

fn invoker(script: &Path, token: &CancellationToken) -> Result<CancellableInvoker<ScriptedInvoker>> {
    let scripted = ScriptedInvoker::from_file(script)
        .with_context(|| format!("Failed to load script {}", script.display()))?;
    Ok(CancellableInvoker::new(scripted, token.clone()))
}

fn print<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_version_skips_config() {
        let cli = Cli::try_parse_from(["taxis", "--config", "/missing/taxis.toml", "version"]).unwrap();
        assert!(!cli.command.needs_config());
    }

    #[test]
    fn test_run_commands_need_config() {
        let cli = Cli::try_parse_from([
            "taxis", "chain", "--definition", "chain.toml", "--script", "replies.json", "hello",
        ])
        .unwrap();
        assert!(cli.command.needs_config());
    }

    #[test]
    fn test_malformed_config_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[fan_out\nmax_concurrency = ").unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }
}
