//! `topoform` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — validate a topology manifest (duplicates, dangling refs, cycles).
//! - `plan`     — print the execution waves a manifest would run in.
//! - `apply`    — run a manifest against the simulated provider and print the report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use engine::{
    execution_waves, CancelToken, Deployment, ExecutorConfig, Manifest, NodeStatus, PlanExecutor,
    PlanStatus,
};
use provider::retry::RetryProvider;
use provider::sim::SimProvider;

#[derive(Parser)]
#[command(
    name = "topoform",
    about = "Declarative infrastructure topology engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a topology manifest JSON file.
    Validate {
        /// Path to the manifest JSON file.
        path: PathBuf,
    },
    /// Show the waves resources would be applied in, without applying.
    Plan {
        /// Path to the manifest JSON file.
        path: PathBuf,
    },
    /// Apply a manifest against the simulated provider.
    Apply {
        /// Path to the manifest JSON file.
        path: PathBuf,
        /// Maximum number of concurrent provider calls.
        #[arg(long, default_value_t = ExecutorConfig::default().max_in_flight)]
        max_in_flight: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let deployment = load(&path)?;
            match deployment.validate() {
                Ok(graph) => {
                    println!(
                        "✅ Manifest is valid: {} resources, {} dependency edges",
                        graph.names().len(),
                        graph.edge_count()
                    );
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Plan { path } => {
            let deployment = load(&path)?;
            let graph = match deployment.validate() {
                Ok(graph) => graph,
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            };
            for (i, wave) in execution_waves(&graph).iter().enumerate() {
                println!("Wave {}: {}", i + 1, wave.join(", "));
            }
            for (producer, dependent) in graph.edges() {
                println!("  {producer} -> {dependent}");
            }
        }
        Command::Apply {
            path,
            max_in_flight,
        } => {
            let deployment = load(&path)?;
            info!("Applying {} resources", deployment.nodes().len());

            let provider = RetryProvider::with_defaults(Arc::new(SimProvider::new()));
            let executor = PlanExecutor::new(
                Arc::new(provider),
                ExecutorConfig { max_in_flight },
            );
            let report = match executor.run(&deployment, CancelToken::new()).await {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            };

            for node in &report.nodes {
                match node.status {
                    NodeStatus::Succeeded => println!("✅ {} ({})", node.name, node.kind),
                    NodeStatus::Failed => println!(
                        "❌ {} ({}): {}",
                        node.name,
                        node.kind,
                        node.error.as_deref().unwrap_or("unknown failure")
                    ),
                    NodeStatus::Skipped => println!(
                        "⏭️  {} ({}): {}",
                        node.name,
                        node.kind,
                        node.error.as_deref().unwrap_or("skipped")
                    ),
                }
            }

            if !deployment.exports().is_empty() {
                match deployment.collect_exports() {
                    Ok(exports) => {
                        for (name, value) in exports {
                            println!("{name} = {value}");
                        }
                    }
                    Err(e) => eprintln!("⚠️  {e}"),
                }
            }

            if report.status == PlanStatus::PartiallyFailed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Read, parse, and lower a manifest file into a deployment.
fn load(path: &PathBuf) -> anyhow::Result<Deployment> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let manifest = Manifest::parse(&content).context("invalid manifest JSON")?;
    manifest
        .into_deployment()
        .context("manifest references could not be lowered")
}
