//! Per-job execution protocol.
//!
//! One delivery walks the job row PENDING -> PROCESSING -> COMPLETED or
//! FAILED, appends to the attempt log, uploads under the mtproto key scheme
//! and notifies the originating chat. Failures never requeue here: the
//! delivery is acknowledged and the row carries the error (ack-and-drop;
//! dead-lettering stays a broker concern).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use teltubby_db::ArchiveDb;
use teltubby_protocol::metrics::METRICS;
use teltubby_protocol::naming::mtproto_base_prefix;
use teltubby_protocol::{now_iso, JobMessage, JobState};
use teltubby_storage::ObjectSink;

use crate::mtproto::MtClient;
use crate::notify::Notifier;
use crate::recovery::StoreAuthHooks;
use teltubby_protocol::{StatusFile, WorkerState, WorkerStatus};

/// Shared transport state: the monitor may flip `simulate` at any time.
pub struct TransportState {
    pub client: Option<MtClient>,
    pub simulate: bool,
}

impl TransportState {
    pub fn simulate_only() -> Self {
        Self {
            client: None,
            simulate: true,
        }
    }
}

/// Executes jobs against the store, bucket and transport.
///
/// Shared behind an `Arc` by concurrent delivery tasks; every field is
/// clone-cheap or internally synchronized.
pub struct JobRunner {
    pub db: ArchiveDb,
    pub sink: Arc<dyn ObjectSink>,
    pub transport: Arc<Mutex<TransportState>>,
    pub notifier: Notifier,
    pub status: StatusFile,
    pub io_timeout: Duration,
}

impl JobRunner {
    /// Full per-delivery protocol. Never returns an error to the consume
    /// loop; the job row and counters carry the outcome.
    pub async fn handle(&self, job: &JobMessage) {
        // Cancellation is advisory: a row cancelled between publish and
        // delivery is dropped without processing.
        match self.db.get_job(&job.job_id).await {
            Ok(Some(row)) if row.state == JobState::Cancelled => {
                info!("job {} cancelled before processing; dropping", job.job_id);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("job {} lookup failed: {e}", job.job_id);
            }
        }

        let attempt_number = match self.db.list_attempts(&job.job_id).await {
            Ok(attempts) => attempts.len() as i64 + 1,
            Err(_) => 1,
        };
        let attempt_id = self
            .db
            .begin_attempt(&job.job_id, attempt_number, &now_iso())
            .await
            .ok();

        match self.run_job(job).await {
            Ok(key) => {
                if let Err(e) = self
                    .db
                    .update_job_state(&job.job_id, JobState::Completed, None, &now_iso())
                    .await
                {
                    warn!("job {} completed but state update failed: {e}", job.job_id);
                }
                if let Some(id) = attempt_id {
                    let _ = self.db.finish_attempt(id, &now_iso(), true, None).await;
                }
                METRICS.inc_jobs_completed();
                self.bump_status(|s| s.jobs_completed += 1);
                info!("job {} completed: {key}", job.job_id);
                self.notifier
                    .chat(
                        job.chat_id,
                        &format!("Large file archived successfully. Job {}", job.job_id),
                    )
                    .await;
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!("job {} failed: {error}", job.job_id);
                if let Err(e) = self
                    .db
                    .update_job_state(&job.job_id, JobState::Failed, Some(&error), &now_iso())
                    .await
                {
                    warn!("job {} state update failed: {e}", job.job_id);
                }
                if let Some(id) = attempt_id {
                    let _ = self
                        .db
                        .finish_attempt(id, &now_iso(), false, Some(&error))
                        .await;
                }
                METRICS.inc_jobs_failed();
                self.bump_status(|s| s.jobs_failed += 1);
            }
        }
    }

    /// Acquire, verify and upload one job's content; returns the object key.
    pub async fn run_job(&self, job: &JobMessage) -> Result<String> {
        self.db
            .update_job_state(&job.job_id, JobState::Processing, None, &now_iso())
            .await
            .context("transition to PROCESSING")?;

        let temp = tempfile::Builder::new()
            .prefix("mtw_")
            .tempfile()
            .context("create temp file")?;

        let simulate = {
            let state = self.transport.lock().await;
            state.simulate
        };

        let written = if simulate {
            // Development placeholder: no transport traffic, jobs complete
            // with a zero-filled object of the declared size.
            let size = job.file_info.file_size.unwrap_or(1024 * 1024);
            write_placeholder(temp.path(), size).await?
        } else {
            self.probe_session().await?;
            let state = self.transport.lock().await;
            let client = state
                .client
                .as_ref()
                .ok_or_else(|| anyhow!("transport unavailable"))?;
            tokio::time::timeout(
                self.io_timeout,
                client.fetch_to_file(job.chat_id, job.message_id, temp.path()),
            )
            .await
            .map_err(|_| anyhow!("download timed out after {:?}", self.io_timeout))??
        };

        // Verify on-disk bytes match what the transport reported.
        let on_disk = tokio::fs::metadata(temp.path()).await?.len();
        if on_disk != written {
            bail!("size mismatch: transport reported {written} bytes, found {on_disk}");
        }
        if on_disk == 0 {
            bail!("downloaded file is empty");
        }

        let base = mtproto_base_prefix(Utc::now(), job.message_id);
        let name = job
            .file_info
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}.bin", job.file_info.file_unique_id));
        let key = format!("{base}{name}");

        self.sink
            .put_file(
                &key,
                temp.path(),
                on_disk,
                job.file_info.mime_type.as_deref(),
            )
            .await
            .with_context(|| format!("upload {key}"))?;

        Ok(key)
    }

    /// Health gate before a real acquisition: one in-line recovery attempt,
    /// then fail the job.
    async fn probe_session(&self) -> Result<()> {
        let state = self.transport.lock().await;
        let Some(client) = &state.client else {
            bail!("transport unavailable");
        };
        if client.healthy().await {
            return Ok(());
        }

        warn!("session unhealthy at job start; attempting recovery");
        self.notifier
            .admins(
                "MTProto session expired while processing a job. Submit a fresh code with /mtcode <code>.",
            )
            .await;
        let hooks = StoreAuthHooks::new(self.db.clone());
        client
            .sign_in(&hooks)
            .await
            .context("in-line session recovery")?;
        if !client.healthy().await {
            bail!("session still unhealthy after recovery");
        }
        Ok(())
    }

    fn bump_status(&self, update: impl FnOnce(&mut WorkerStatus)) {
        let mut status = self
            .status
            .read_current()
            .unwrap_or_else(WorkerStatus::starting);
        update(&mut status);
        status.last_activity = Some(now_iso());
        if status.state == WorkerState::Starting {
            status.state = WorkerState::Healthy;
        }
        self.status.write(&status);
    }
}

/// Zero-filled placeholder for simulate mode.
async fn write_placeholder(path: &std::path::Path, size: u64) -> Result<u64> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path).await?;
    let chunk = vec![0u8; 64 * 1024];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        file.write_all(&chunk[..n]).await?;
        remaining -= n as u64;
    }
    file.flush().await?;
    Ok(size)
}
