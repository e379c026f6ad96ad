// bin/agent.rs - Minio Agent Binary
//
//! Minio deployment agent
//!
//! # Usage
//!
//! ```bash
//! # Deliver one hook to the unit
//! minio-agent hook install --unit minio/0 --snapshot ./relations.json --leader
//!
//! # Keep evaluating update-status and serve metrics
//! minio-agent run --unit minio/0 --snapshot ./relations.json --metrics 0.0.0.0:9090
//!
//! # Show the persisted unit state
//! minio-agent state
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use minio_agent::charm::{AgentEnv, Event, MinioCharm};
use minio_agent::command::{CommandRunner, DryRunRunner, SystemCommandRunner};
use minio_agent::observability::{
    init_metrics, init_tracing, MetricsConfig, TracingConfig, TracingFormat,
};
use minio_agent::relation::{MemoryDirectory, RelationFabric, UnitId};
use minio_agent::settings::Settings;
use minio_agent::store::StateStore;

/// Minio deployment agent
#[derive(Parser, Debug)]
#[command(name = "minio-agent")]
#[command(version)]
#[command(about = "Installs, configures and coordinates Minio units", long_about = None)]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the unit state database
    #[arg(long, default_value = "./state", global = true)]
    state_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (pretty, compact, json)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: TracingFormat,

    /// Log commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver one hook and print the resulting status
    Hook {
        /// Hook name, e.g. config-changed or cluster-relation-departed
        event: String,

        /// Unit that left, for departure hooks
        #[arg(long)]
        remote_unit: Option<String>,

        #[command(flatten)]
        target: UnitArgs,
    },

    /// Evaluate update-status periodically until interrupted
    Run {
        /// Seconds between update-status evaluations
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics: Option<SocketAddr>,

        #[command(flatten)]
        target: UnitArgs,
    },

    /// Print the persisted unit state with secrets masked
    State,
}

#[derive(Args, Debug)]
struct UnitArgs {
    /// Unit name, e.g. minio/0
    #[arg(long)]
    unit: String,

    /// Relation snapshot shared by the units of a deployment
    #[arg(long, default_value = "./relations.json")]
    snapshot: PathBuf,

    /// Storage devices attached to the unit
    #[arg(long, default_value = "1")]
    storage_count: usize,

    /// Hostname peers reach the unit under
    #[arg(long)]
    hostname: Option<String>,

    /// Address the service binds to
    #[arg(long, default_value = "127.0.0.1")]
    binding_addr: String,

    /// The unit holds leadership
    #[arg(long)]
    leader: bool,
}

impl UnitArgs {
    fn env(&self, settings: &Settings) -> AgentEnv {
        let hostname = self
            .hostname
            .clone()
            .or_else(|| settings.hostname.clone())
            .unwrap_or_else(|| self.binding_addr.clone());
        AgentEnv {
            unit: UnitId::new(self.unit.as_str()),
            storage_count: self.storage_count,
            hostname,
            binding_addr: self.binding_addr.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(
        TracingConfig::default()
            .with_level(&cli.log_level)
            .with_format(cli.log_format.clone()),
    );

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if !cli.state_dir.exists() {
        std::fs::create_dir_all(&cli.state_dir)?;
        info!(path = ?cli.state_dir, "Created state directory");
    }
    let store = StateStore::open(cli.state_dir.join("unit.db"))
        .with_context(|| format!("Failed to open state in {:?}", cli.state_dir))?;

    let runner: Arc<dyn CommandRunner> = if cli.dry_run {
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(SystemCommandRunner)
    };

    match cli.command {
        Commands::Hook {
            event,
            remote_unit,
            target: unit,
        } => {
            let event = Event::from_hook(&event, remote_unit.as_deref())?;
            let charm = MinioCharm::new(settings.clone(), unit.env(&settings), runner);
            let status = evaluate(&charm, &store, &unit, event)?;
            println!("{}", status);
        }

        Commands::Run {
            interval,
            metrics,
            target: unit,
        } => {
            let handle = match metrics {
                Some(addr) => {
                    let config = MetricsConfig {
                        listen_addr: addr,
                        ..Default::default()
                    };
                    Some(init_metrics(config)?)
                }
                None => None,
            };
            let charm = MinioCharm::new(settings.clone(), unit.env(&settings), runner);
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

            info!(unit = %unit.unit, interval, "Agent running, press Ctrl+C to stop");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match evaluate(&charm, &store, &unit, Event::UpdateStatus) {
                            Ok(status) => {
                                if let Some(handle) = &handle {
                                    handle.set_ready(status.is_active());
                                }
                            }
                            Err(e) => error!(error = %e, "update-status failed"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        Commands::State => {
            let state = store.load()?;
            println!("{}", serde_json::to_string_pretty(&state.redacted())?);
        }
    }

    Ok(())
}

/// Load the relation snapshot and unit state, dispatch, persist both
fn evaluate(
    charm: &MinioCharm,
    store: &StateStore,
    unit: &UnitArgs,
    event: Event,
) -> Result<minio_agent::UnitStatus> {
    let fabric = load_fabric(&unit.snapshot)?;
    let mut dir = MemoryDirectory::new(fabric.clone(), charm.env().unit.clone(), unit.leader);
    let mut state = store.load()?;

    let result = charm.dispatch(event, &mut dir, &mut state);

    // Deferred events survive a failed evaluation
    store.save(&state)?;
    fabric
        .save_json(&unit.snapshot)
        .with_context(|| format!("Failed to write {:?}", unit.snapshot))?;
    Ok(result?)
}

fn load_fabric(path: &Path) -> Result<RelationFabric> {
    match RelationFabric::load_json(path) {
        Ok(fabric) => Ok(fabric),
        Err(e) => {
            warn!(path = ?path, "Unreadable relation snapshot");
            Err(e).with_context(|| format!("Failed to read {:?}", path))
        }
    }
}
