mod doctor;
mod driver;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use buildgraph_core::config::AppConfig;
use buildgraph_core::traits::TracingSink;
use buildgraph_tasks::TaskRegistry;

use crate::driver::{Driver, RunOptions};

#[derive(Parser)]
#[command(name = "buildgraph", version, about = "Script-driven build graph runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "buildgraph.toml", env = "BUILDGRAPH_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a script and execute its nodes
    Run {
        /// Script to read, relative to the workspace root
        script: PathBuf,
        /// Nodes, aggregates or tags to build (separated by ';')
        #[arg(long)]
        target: Option<String>,
        /// Execute only this node, taking its inputs from temp storage
        #[arg(long)]
        single_node: Option<String>,
        /// Discard local temp storage before running
        #[arg(long)]
        clean: bool,
        /// Option overrides (Name=Value)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
    /// Read a script and print the resulting graph
    List {
        /// Script to read, relative to the workspace root
        script: PathBuf,
        /// Nodes, aggregates or tags to show (separated by ';')
        #[arg(long)]
        target: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Option overrides (Name=Value)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
    /// Check local temp storage against shared storage and the workspace
    Check,
    /// Remove local temp storage
    Clean,
    /// Run configuration and storage health checks
    Doctor,
    /// List registered tasks and their parameters
    Tasks,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("buildgraph=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "buildgraph", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let registry = TaskRegistry::with_builtins();

    match cli.command {
        Commands::Run {
            script,
            target,
            single_node,
            clean,
            set,
        } => {
            let arguments = parse_arguments(&set)?;
            let mut driver = Driver::new(config, registry);
            let graph = driver.load_graph(&script, &arguments, &TracingSink)?;

            let options = RunOptions {
                targets: target,
                single_node,
                clean,
            };
            let summary = driver.run(&graph, &options).await?;
            info!(
                executed = summary.executed.len(),
                skipped = summary.skipped.len(),
                "Build complete"
            );
        }
        Commands::List {
            script,
            target,
            json,
            set,
        } => {
            let arguments = parse_arguments(&set)?;
            let driver = Driver::new(config, registry);
            let graph = driver.load_graph(&script, &arguments, &TracingSink)?;
            let graph = match target {
                Some(target) => graph.select_names(&target)?,
                None => graph,
            };

            let summary = graph.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
        }
        Commands::Check => {
            let mut driver = Driver::new(config, registry);
            let discarded = driver.storage_mut().check_local_integrity()?;
            if discarded.is_empty() {
                println!("Local temp storage is consistent");
            } else {
                println!("Discarded local temp storage for:");
                for node in discarded {
                    println!("  {}", node);
                }
            }
        }
        Commands::Clean => {
            let mut driver = Driver::new(config, registry);
            driver.storage_mut().clean_local()?;
            println!(
                "Removed {}",
                driver.storage().local_dir().display()
            );
        }
        Commands::Doctor => {
            println!("buildgraph doctor");
            println!();
            doctor::run_doctor(&config, &registry);
        }
        Commands::Tasks => {
            for name in registry.list() {
                let Some(schema) = registry.schema(name) else {
                    continue;
                };
                println!("{:<16} {}", schema.name, schema.description);
                for parameter in &schema.parameters {
                    println!(
                        "    {:<12} {:?}{}",
                        parameter.name,
                        parameter.kind,
                        if parameter.required { " (required)" } else { "" }
                    );
                }
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        warn!(path = %path.display(), "No config file found, using defaults");
        Ok(AppConfig::default())
    }
}

/// Parse `Name=Value` option overrides.
fn parse_arguments(values: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut arguments = BTreeMap::new();
    for value in values {
        let (name, value) = value
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got '{}'", value))?;
        arguments.insert(name.trim().to_string(), value.to_string());
    }
    Ok(arguments)
}
