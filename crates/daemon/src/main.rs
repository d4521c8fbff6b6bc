use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use discovery_daemon::config::DaemonConfig;
use discovery_daemon::snapshot::HttpSnapshotProvider;
use discovery_daemon::{backend, leader, scheduler::Scheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "discovery-daemon", version)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::load(&args.config)?;
    config.validate().context("invalid configuration")?;

    let address = config.address_resolver()?;
    let backends = backend::build(config.resolvers()?, &address).context("failed to set up backends")?;
    let provider = HttpSnapshotProvider::new(
        config.state_url_template.clone(),
        Duration::from_secs(config.state_timeout_seconds),
    )?;

    tracing::info!(
        masters = ?config.masters,
        backends = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
        refresh_seconds = config.refresh_seconds,
        "daemon starting"
    );

    let mut scheduler = Scheduler::new(
        provider,
        backends,
        Duration::from_secs(config.refresh_seconds),
        Duration::from_secs(config.leader_timeout_seconds),
    );
    let events = leader::static_leaders(config.masters.clone());

    tokio::select! {
        res = scheduler.run(events) => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
    }
    Ok(())
}
