//! teltubby large-file worker.
//!
//! Usage:
//!     teltubby-worker            # configuration comes from the environment

use clap::Parser;
use teltubby_logging::{init_logging, LogConfig};
use teltubby_protocol::AppConfig;
use teltubby_worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    init_logging(LogConfig {
        app_name: "teltubby-worker",
        logs_dir: &config.logs_dir,
        level: &config.log_level,
        rotate_max_bytes: config.log_rotate_max_bytes,
        rotate_backup_count: config.log_rotate_backup_count,
    })?;

    tracing::info!("Starting teltubby worker");
    tracing::info!("  Queue: {}", config.job_queue_name);
    tracing::info!("  Store: {}", config.sqlite_path);
    tracing::info!("  Bucket: {}", config.s3_bucket);

    let mut worker = Worker::start(config).await?;

    tokio::select! {
        result = worker.run() => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::warn!("received shutdown signal");
        }
    }

    worker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
