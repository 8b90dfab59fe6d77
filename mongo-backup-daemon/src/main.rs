//! MongoDB Backup Daemon - Main entry point

use anyhow::Result;
use clap::Parser;
use mongo_backup_daemon::daemon::clock::SystemClock;
use mongo_backup_daemon::daemon::shutdown::ShutdownCoordinator;
use mongo_backup_daemon::stats::sink;
use mongo_backup_daemon::tools::ProcessRunner;
use mongo_backup_daemon::{utils, Config, Daemon};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run the startup restore and a single cycle, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    config.validate()?;

    tracing::info!(
        backups_dir = %config.backup.dir.display(),
        data_dir = %config.engine.data_dir.display(),
        max_backups = config.backup.max_backups,
        "Starting mongo-backup-daemon v{}",
        env!("CARGO_PKG_VERSION")
    );
    match &config.metrics.host {
        Some(host) => tracing::info!(
            "Sending metrics to {}:{} as {}.*",
            host,
            config.metrics.port,
            config.metrics.prefix
        ),
        None => tracing::warn!("No metrics host configured, metrics will only be logged"),
    }

    let mut daemon = Daemon::new(
        &config,
        Arc::new(ProcessRunner),
        sink::from_config(&config.metrics),
        SystemClock,
    );

    // Cancel the loop on SIGINT/SIGTERM
    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown = shutdown_coordinator.token();
    tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
    });

    if args.once {
        daemon.run_once(shutdown).await;
    } else {
        daemon.run(shutdown).await;
    }
    tracing::info!("Backup daemon stopped");

    Ok(())
}
