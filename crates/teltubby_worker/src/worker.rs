//! Worker lifecycle: startup, queue consumption, shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use teltubby_db::ArchiveDb;
use teltubby_protocol::{AppConfig, JobMessage};
use teltubby_queue::{JobQueue, QueueConfig};
use teltubby_storage::{BucketClient, S3Config};

use crate::mtproto::{MtClient, MtConfig};
use crate::notify::Notifier;
use crate::recovery::{SessionMonitor, StoreAuthHooks};
use crate::runner::{JobRunner, TransportState};
use teltubby_protocol::{StatusFile, WorkerState, WorkerStatus};

pub struct Worker {
    config: AppConfig,
    queue: JobQueue,
    runner: Arc<JobRunner>,
    transport: Arc<Mutex<TransportState>>,
    status: StatusFile,
    monitor: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    /// Bring up every collaborator; fatal configuration errors abort startup.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let status = StatusFile::new(&config.worker_status_path);
        status.write(&WorkerStatus::starting());

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

        let db = ArchiveDb::open(&config.sqlite_path)
            .await
            .context("open archive store")?;

        let notifier = Notifier::new(&config.telegram_bot_token, config.whitelist());

        let transport = Arc::new(Mutex::new(Self::start_transport(&config, &db, &notifier).await));
        {
            let state = transport.lock().await;
            let mut current = status.read_current().unwrap_or_else(WorkerStatus::starting);
            current.state = if state.simulate {
                WorkerState::Simulate
            } else {
                WorkerState::Healthy
            };
            current.authorized = !state.simulate;
            status.write(&current);
        }

        let queue = JobQueue::connect(QueueConfig {
            url: config.amqp_url(),
            queue: config.job_queue_name.clone(),
            dead_letter_queue: config.job_dead_letter_queue.clone(),
            exchange: config.job_exchange.clone(),
            dlx_exchange: config.job_dlx_exchange.clone(),
        })
        .await
        .context("connect to broker")?;

        let runner = Arc::new(JobRunner {
            db: db.clone(),
            sink: Arc::new(bucket),
            transport: transport.clone(),
            notifier: notifier.clone(),
            status: status.clone(),
            io_timeout: Duration::from_secs(config.io_timeout_seconds),
        });

        // Session health loop runs for the lifetime of the worker.
        let monitor = SessionMonitor {
            db,
            notifier,
            transport: transport.clone(),
            status: status.clone(),
            probe_interval: Duration::from_secs(config.session_probe_interval_seconds),
            max_failures: config.max_auth_failures,
        };
        let monitor = tokio::spawn(monitor.run());

        Ok(Self {
            config,
            queue,
            runner,
            transport,
            status,
            monitor: Some(monitor),
        })
    }

    /// Connect the MTProto transport, falling back to simulate mode when
    /// credentials are absent or startup fails.
    async fn start_transport(
        config: &AppConfig,
        db: &ArchiveDb,
        notifier: &Notifier,
    ) -> TransportState {
        if !config.mtproto_configured() {
            warn!("MTProto credentials not configured; simulate mode enabled");
            return TransportState::simulate_only();
        }

        let mt_config = MtConfig {
            api_id: config.mtproto_api_id,
            api_hash: config.mtproto_api_hash.clone().unwrap_or_default(),
            phone_number: config.mtproto_phone_number.clone().unwrap_or_default(),
            session_path: PathBuf::from(&config.mtproto_session_path),
        };

        match Self::connect_transport(mt_config, db, notifier).await {
            Ok(client) => TransportState {
                client: Some(client),
                simulate: false,
            },
            Err(e) => {
                error!("mtproto start failed; entering simulate mode: {e:#}");
                TransportState::simulate_only()
            }
        }
    }

    async fn connect_transport(
        mt_config: MtConfig,
        db: &ArchiveDb,
        notifier: &Notifier,
    ) -> Result<MtClient> {
        let client = MtClient::connect(mt_config).await?;
        if !client.is_authorized().await? {
            notifier
                .admins(
                    "MTProto login required. Telegram sent a verification code; submit it with /mtcode <code>.",
                )
                .await;
            let hooks = StoreAuthHooks::new(db.clone());
            client.sign_in(&hooks).await?;
        }
        Ok(client)
    }

    /// Consume the job queue until shutdown.
    ///
    /// Each delivery runs in its own task; a semaphore sized to
    /// `worker_concurrency` bounds in-flight jobs alongside the broker
    /// prefetch set on the consumer.
    pub async fn run(&mut self) -> Result<()> {
        let concurrency = self.config.worker_concurrency.max(1);
        let mut consumer = self.queue.consumer("teltubby-worker", concurrency).await?;
        let slots = Arc::new(Semaphore::new(concurrency as usize));
        info!(
            "worker started, queue {} concurrency {concurrency}",
            self.config.job_queue_name
        );

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    let Ok(permit) = slots.clone().acquire_owned().await else {
                        break;
                    };
                    let runner = self.runner.clone();
                    tokio::spawn(async move {
                        Self::on_delivery(runner, delivery).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("consumer error: {e}");
                    break;
                }
            }
        }

        info!("worker consume loop ended");
        Ok(())
    }

    /// Parse and execute one delivery. Always acknowledges: the job row
    /// carries failures, poisoned payloads are logged and dropped.
    async fn on_delivery(runner: Arc<JobRunner>, delivery: Delivery) {
        match serde_json::from_slice::<JobMessage>(&delivery.data) {
            Ok(job) => {
                if let Err(e) = job.validate() {
                    warn!("rejecting invalid job payload: {e}");
                } else {
                    runner.handle(&job).await;
                }
            }
            Err(e) => {
                warn!("undecodable job payload ({} bytes): {e}", delivery.data.len());
            }
        }
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("ack failed: {e}");
        }
    }

    /// Persist the session and stop the monitor.
    pub async fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        let state = self.transport.lock().await;
        if let Some(client) = &state.client {
            if let Err(e) = client.save_session() {
                warn!("failed to persist session on shutdown: {e}");
            }
        }
        let mut status = self
            .status
            .read_current()
            .unwrap_or_else(WorkerStatus::starting);
        status.state = WorkerState::Stopped;
        self.status.write(&status);
        info!("worker stopped");
    }
}
