// ABOUTME: Entry point for the aegis binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs graphs or manages the agent manifest.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aegis_agent::{AgentRegistry, ImplementationTable, register_stubs};
use aegis_core::{AgentStatus, Metrics, TaskGraph};
use aegis_orchestrator::{Orchestrator, OrchestratorConfig};
use aegis_store::{FeedbackStore, ManifestSource, YamlManifest};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aegis", version, about = "Run task graphs against the agent registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build and run a task graph JSON file
    Run {
        graph: PathBuf,
        /// Per-invocation tool timeout in milliseconds
        #[arg(long)]
        tool_timeout_ms: Option<u64>,
    },
    /// List manifest entries
    Agents {
        /// Only show entries with this status (active, beta, deprecated)
        #[arg(long)]
        status: Option<String>,
    },
    /// Point an agent at a new version, optionally a new implementation
    Upgrade {
        agent_id: String,
        version: String,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        classname: Option<String>,
    },
    /// Show variant counters for a pipeline
    Stats { pipeline_id: String },
}

fn parse_status(s: &str) -> anyhow::Result<AgentStatus> {
    match s.trim().to_ascii_lowercase().as_str() {
        "active" => Ok(AgentStatus::Active),
        "beta" => Ok(AgentStatus::Beta),
        "deprecated" => Ok(AgentStatus::Deprecated),
        other => bail!("unknown agent status '{other}'"),
    }
}

/// Registry over the configured manifest, with a stub implementation
/// registered for every entry it currently lists.
fn stub_registry(config: &OrchestratorConfig) -> anyhow::Result<Arc<AgentRegistry>> {
    let manifest = Arc::new(YamlManifest::new(&config.manifest_path));
    let entries = manifest
        .load()
        .with_context(|| format!("loading {}", config.manifest_path.display()))?;

    let mut table = ImplementationTable::new();
    register_stubs(&mut table, &entries);
    tracing::debug!(implementations = table.len(), "implementation table ready");

    Ok(Arc::new(
        AgentRegistry::new(manifest, table).with_lock_timeout(config.registry_lock_timeout),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("aegis=info,aegis_orchestrator=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::from_env()?;
    tracing::info!(home = %config.home.display(), "aegis starting up");

    match cli.command {
        Command::Run {
            graph,
            tool_timeout_ms,
        } => {
            let json = std::fs::read_to_string(&graph)
                .with_context(|| format!("reading {}", graph.display()))?;
            let graph = TaskGraph::from_json(&json)?;

            let metrics = Arc::new(Metrics::new());
            let feedback = Arc::new(FeedbackStore::open(&config.feedback_db, Arc::clone(&metrics))?);
            let registry = stub_registry(&config)?;
            let orchestrator = Orchestrator::new(registry, feedback, Arc::clone(&metrics), config)?;

            let mut flow = orchestrator.build(graph).await?;
            if let Some(ms) = tool_timeout_ms {
                flow = flow.with_tool_timeout(Duration::from_millis(ms));
            }
            let report = flow.run().await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            tracing::debug!(metrics = %metrics.render(), "run metrics");
            Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Agents { status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let registry = stub_registry(&config)?;
            for entry in registry.list(status).await? {
                println!(
                    "{}\t{}\t{}\t{}.{}",
                    entry.id, entry.version, entry.status, entry.module_ref, entry.impl_name
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Upgrade {
            agent_id,
            version,
            module,
            classname,
        } => {
            let registry = stub_registry(&config)?;
            let entry = registry
                .upgrade(&agent_id, &version, module.as_deref(), classname.as_deref())
                .await?;
            println!("{} -> {} ({}.{})", entry.id, entry.version, entry.module_ref, entry.impl_name);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats { pipeline_id } => {
            let feedback = FeedbackStore::open(&config.feedback_db, Arc::new(Metrics::new()))?;
            for stat in feedback.stats(&pipeline_id)? {
                println!(
                    "{}\t{}\t{}\t{:.3}",
                    stat.variant,
                    stat.success,
                    stat.failure,
                    stat.success_rate().unwrap_or(0.0)
                );
            }
            let best = feedback.best_variant(&pipeline_id, &config.default_variant)?;
            println!("next: {best}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
