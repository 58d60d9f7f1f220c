//! teltubby bot service.
//!
//! Wires configuration, logging, the health surface, the album finalizer and
//! the Telegram dispatcher. The large-file worker is a separate binary.

mod commands;
mod context;
mod extract;
mod format;
mod health;
mod routing;
mod service;
mod transport;
mod typing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use teloxide::prelude::*;

use teltubby_db::ArchiveDb;
use teltubby_ingest::{AlbumAggregator, PipelineConfig};
use teltubby_logging::{init_logging, LogConfig};
use teltubby_protocol::AppConfig;
use teltubby_queue::{JobQueue, QueueConfig};
use teltubby_storage::{BucketClient, QuotaTracker, S3Config};

use commands::Command;
use context::AppContext;
use transport::BotApiTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    init_logging(LogConfig {
        app_name: "teltubby",
        logs_dir: &config.logs_dir,
        level: &config.log_level,
        rotate_max_bytes: config.log_rotate_max_bytes,
        rotate_backup_count: config.log_rotate_backup_count,
    })?;

    if config.telegram_bot_token.is_empty() {
        bail!("TELEGRAM_BOT_TOKEN is required");
    }
    match config.telegram_mode.as_str() {
        "polling" => {}
        "webhook" => bail!("TELEGRAM_MODE=webhook is not supported by this build; use polling"),
        other => bail!("unknown TELEGRAM_MODE '{other}' (expected polling|webhook)"),
    }

    tracing::info!("starting teltubby, mode {}", config.telegram_mode);

    let db = ArchiveDb::open(&config.sqlite_path)
        .await
        .context("open archive store")?;

    let bucket = BucketClient::new(&S3Config {
        endpoint: config.s3_endpoint.clone(),
        access_key_id: config.s3_access_key_id.clone(),
        secret_access_key: config.s3_secret_access_key.clone(),
        bucket: config.s3_bucket.clone(),
        region: config.s3_region.clone(),
        force_path_style: config.s3_force_path_style,
        tls_skip_verify: config.minio_tls_skip_verify,
        multipart_threshold_mb: config.s3_multipart_threshold_mb,
        multipart_part_size_mb: config.s3_multipart_part_size_mb,
    })?;
    bucket.ensure_bucket().await.context("object store")?;

    let queue = JobQueue::connect(QueueConfig {
        url: config.amqp_url(),
        queue: config.job_queue_name.clone(),
        dead_letter_queue: config.job_dead_letter_queue.clone(),
        exchange: config.job_exchange.clone(),
        dlx_exchange: config.job_dlx_exchange.clone(),
    })
    .await
    .context("connect to broker")?;

    let bot = Bot::new(&config.telegram_bot_token);

    let pipeline = PipelineConfig {
        small_path_limit_bytes: config.bot_api_max_file_size_bytes,
        max_file_bytes: config.max_file_bytes(),
        dedup_enable: config.dedup_enable,
        io_timeout: Duration::from_secs(config.io_timeout_seconds),
    };
    let ctx = Arc::new(AppContext {
        quota: QuotaTracker::new(bucket.clone(), config.bucket_quota()),
        albums: AlbumAggregator::new(Duration::from_secs(
            config.album_aggregation_window_seconds,
        )),
        transport: BotApiTransport::new(bot.clone()),
        ingest_slots: tokio::sync::Semaphore::new(config.effective_concurrency() as usize),
        pipeline,
        db,
        bucket,
        queue,
        config,
    });

    let health_task = health::serve(ctx.clone()).await?;
    let finalizer_task = service::spawn_finalizer(bot.clone(), ctx.clone());

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(commands::handle_command),
        )
        .branch(Update::filter_message().endpoint(service::on_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx.clone()])
        .default_handler(|_| async {})
        .build();

    tokio::select! {
        _ = dispatcher.dispatch() => {
            tracing::info!("dispatcher stopped");
        }
        _ = shutdown_signal() => {
            tracing::warn!("received shutdown signal");
        }
    }

    finalizer_task.abort();
    health_task.abort();
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
