//! Starts a Galera node: decides between bootstrapping and joining, brings
//! the engine up, and supervises it until SIGTERM or SIGINT.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod error;

use config::{Config, ProbeKind};
use error::{Error, Result};

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use galera_mysqld::Mysqld;
use galera_node_state_fs::FsNodeStateStore;
use galera_orchestrator::{DecisionPolicy, StartOrchestrator, StartOrchestratorOptions};
use galera_quorum::{HttpProbe, PeerProbe, QuorumHealthChecker, TcpProbe};
use galera_upgrader::MysqlUpgrader;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML configuration file; built-in defaults are used when absent
    #[arg(long, env = "GALERA_INIT_CONFIG")]
    config: Option<PathBuf>,

    /// Bootstrap a new cluster even if this node was clustered and no peer is healthy
    #[arg(long, env = "GALERA_INIT_FORCE_BOOTSTRAP")]
    force_bootstrap: bool,

    /// Log filter, e.g. `debug` or `info,mysqld=warn`; overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Start the engine with replication disabled, for maintenance
    #[arg(long)]
    stand_alone: bool,
}

fn init_tracing(log_level: Option<&str>) -> Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).map_err(|e| Error::LogFilter(e.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    Ok(())
}

async fn start(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!("loading config from {}", path.display());
            Config::load(path)?
        }
        None => {
            info!("no config file given, using defaults");
            Config::default()
        }
    };
    config.validate()?;

    let policy = config.policy(args.force_bootstrap, args.stand_alone);
    let port = config.manager.health_check_port;

    match config.manager.probe {
        ProbeKind::Http => run(&config, policy, HttpProbe::new(port)).await,
        ProbeKind::Tcp => run(&config, policy, TcpProbe::new(port)).await,
    }
}

async fn run<P>(config: &Config, policy: DecisionPolicy, probe: P) -> Result<()>
where
    P: PeerProbe,
{
    let mysqld = Mysqld::new(config.mysqld_options());

    let orchestrator = Arc::new(StartOrchestrator::new(StartOrchestratorOptions {
        engine: mysqld.clone(),
        health_checker: QuorumHealthChecker::new(config.health_checker_options(probe)),
        policy,
        post_start: mysqld.clone(),
        reachability: config.reachability_options(),
        seeder: mysqld,
        state_store: FsNodeStateStore::new(config.manager.state_file.clone()),
        upgrader: MysqlUpgrader::new(config.upgrader_options()),
    }));

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::Io("failed to create SIGTERM signal", e))?;

    let signal_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, initiating shutdown"),
        }
        signal_orchestrator.shutdown();
    });

    orchestrator.execute().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.log_level.as_deref()) {
        eprintln!("galera-init: {e}");
        return ExitCode::FAILURE;
    }

    match start(args).await {
        Ok(()) => {
            info!("process exited without error");
            ExitCode::SUCCESS
        }
        Err(Error::Orchestrator(e)) => {
            error!("{} failed: {e}", e.stage());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
