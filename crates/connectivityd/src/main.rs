//! connectivityd - connectivity orchestration daemon
//!
//! Entry point: loads the configuration, builds the trackers, starts the
//! orchestrator and the interface watcher, then runs until SIGINT.

use anyhow::{Context, Result};
use clap::Parser;
use connectivityd::tracker::{LinkControl, RecordingLinkControl, ShellLinkControl};
use connectivityd::{
    DaemonConfig, FactoryRegistry, InterfaceWatcher, IpCommandTransport, NetdTransport, RecordingTransport, Service,
    DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connectivity orchestration daemon
#[derive(Parser, Debug)]
#[command(name = "connectivityd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Record route, resolver and link commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check_config: bool,

    /// Print the orchestrator state as JSON on exit
    #[arg(long)]
    dump_on_exit: bool,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set up logging: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = DaemonConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check_config {
        println!("{}", toml::to_string_pretty(&config)?);
        info!(path = %args.config.display(), "Configuration is valid");
        return Ok(());
    }

    info!("--- Starting connectivityd ---");
    info!(path = %args.config.display(), networks = config.network.len(), dry_run = args.dry_run, "Configuration loaded");

    let recorder = Arc::new(RecordingTransport::new());
    let (transport, link_control) = if args.dry_run {
        (
            recorder.clone() as Arc<dyn NetdTransport>,
            Arc::new(RecordingLinkControl::new()) as Arc<dyn LinkControl>,
        )
    } else {
        (
            Arc::new(IpCommandTransport::new(config.transport.clone())) as Arc<dyn NetdTransport>,
            Arc::new(ShellLinkControl::new(config.transport.ip_cmd.clone())) as Arc<dyn LinkControl>,
        )
    };

    let registry = FactoryRegistry::with_defaults(link_control);
    let service = Service::start(config.clone(), &registry, transport).context("starting connectivity service")?;
    let handle = service.handle();

    let watcher = InterfaceWatcher::new(&config, service.drivers());
    let watcher_task = tokio::spawn(watcher.run(handle.clone()));

    handle.system_ready()?;
    info!("connectivityd ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Received SIGINT, shutting down");

    if args.dump_on_exit {
        match handle.dump().await {
            Ok(dump) => println!("{}", serde_json::to_string_pretty(&dump)?),
            Err(e) => warn!(error = %e, "Could not dump orchestrator state"),
        }
    }

    watcher_task.abort();
    service.shutdown().await?;
    if args.dry_run {
        info!(commands = recorder.calls().len(), "Dry run finished");
    }
    info!("connectivityd stopped");
    Ok(())
}
