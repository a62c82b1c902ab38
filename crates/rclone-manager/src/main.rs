//! rclone manager - keeps rclone mounts and serve endpoints running.
//!
//! Starts `rclone rcd`, brings up every mount and serve listed in the
//! desired-state YAML, restarts the ones that die and applies edits to the
//! file (or to rclone.conf) while running. SIGINT and SIGTERM stop
//! everything in order.

mod watcher;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::Parser;
use rclone_manager_core::config::{DaemonConfig, PathsConfig};
use rclone_manager_core::{
    DesiredState, ManagerError, Orchestrator, OrchestratorSettings, YamlConfigSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use watcher::ConfigWatcher;

#[derive(Parser, Debug)]
#[command(name = "rclone-manager")]
#[command(about = "Keeps rclone mounts and serve endpoints in sync with a YAML desired state")]
struct Args {
    /// Desired-state YAML file
    #[arg(long, env = PathsConfig::DESIRED_STATE_ENV, default_value = PathsConfig::DEFAULT_DESIRED_STATE)]
    config: PathBuf,

    /// rclone config file; edits trigger a reload
    #[arg(long, default_value = PathsConfig::DEFAULT_RCLONE_CONF)]
    rclone_config: PathBuf,

    /// rclone executable
    #[arg(long, default_value = DaemonConfig::BINARY)]
    rclone_binary: PathBuf,

    /// Address for the rclone rc API
    #[arg(long, default_value = DaemonConfig::RC_ADDR)]
    rc_addr: String,

    /// Enable debug logging
    #[arg(
        short,
        long,
        env = PathsConfig::DEBUG_MODE_ENV,
        value_parser = BoolishValueParser::new()
    )]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting rclone manager");

    let desired = DesiredState::load(&args.config)
        .await
        .with_context(|| format!("Failed to load desired state from {}", args.config.display()))?;

    let settings = OrchestratorSettings::new()
        .with_rclone_binary(&args.rclone_binary)
        .with_rc_addr(&args.rc_addr);
    let orchestrator = Arc::new(Orchestrator::new(settings)?);

    // Listen before startup so a signal during startup still cleans up.
    let signals = tokio::spawn(shutdown_on_signal(Arc::clone(&orchestrator)));

    match orchestrator.initialize(desired).await {
        Ok(()) => {}
        Err(ManagerError::Cancelled) => {
            info!("Startup interrupted by shutdown");
            signals.await??;
            return Ok(());
        }
        Err(e) => {
            error!("Startup failed: {}", e);
            orchestrator.shutdown().await;
            return Err(e.into());
        }
    }

    let (changes_tx, changes_rx) = mpsc::channel(1);
    let watcher = match ConfigWatcher::new(
        &[args.config.clone(), args.rclone_config.clone()],
        changes_tx,
    ) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Live reload disabled: {:#}", e);
            None
        }
    };
    orchestrator
        .spawn_reconfiguration_trigger(Arc::new(YamlConfigSource::new(&args.config)), changes_rx)
        .await;

    signals.await??;
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    info!("rclone manager exited");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then shut the orchestrator down.
async fn shutdown_on_signal(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let signal = wait_for_signal().await?;
    info!("{} received, shutting down", signal);
    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = interrupt.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
