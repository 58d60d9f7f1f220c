//! Shared application state for handlers and background tasks.

use tokio::sync::Semaphore;

use teltubby_db::ArchiveDb;
use teltubby_ingest::{AlbumAggregator, PipelineConfig};
use teltubby_protocol::AppConfig;
use teltubby_queue::JobQueue;
use teltubby_storage::{BucketClient, QuotaTracker};

use crate::transport::BotApiTransport;

pub struct AppContext {
    pub config: AppConfig,
    pub db: ArchiveDb,
    pub bucket: BucketClient,
    pub quota: QuotaTracker,
    pub albums: AlbumAggregator,
    pub queue: JobQueue,
    pub transport: BotApiTransport,
    pub pipeline: PipelineConfig,
    /// Bounds concurrent acquire/upload work across handlers and the
    /// finalizer; sized to the configured concurrency (1..32).
    pub ingest_slots: Semaphore,
}
