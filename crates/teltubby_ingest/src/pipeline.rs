//! Per-batch ingestion pipeline.
//!
//! For each item in timestamp order: classify, fast-path dedup by source
//! unique id, size gates, acquire-and-hash to a temp file, content-hash
//! dedup, deterministic key, fixed-length upload, store record. The batch
//! terminates in a JSON manifest at `<base>/message.json`; a manifest write
//! failure fails the batch, per-item failures do not.

use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use teltubby_db::{ArchiveDb, DbError};
use teltubby_protocol::defaults::MANIFEST_SCHEMA_VERSION;
use teltubby_protocol::metrics::METRICS;
use teltubby_protocol::naming::{build_filename, message_base_prefix, to_safe_slug};
use teltubby_protocol::{
    format_iso, now_iso, Batch, DedupReason, ManifestItem, ManifestTelegram, ManifestV1, MediaItem,
    SkipReason,
};
use teltubby_storage::StorageError;

use crate::transport::{MediaTransport, ObjectSink, TransportError};

/// Pipeline tunables (plain data).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub small_path_limit_bytes: u64,
    pub max_file_bytes: u64,
    pub dedup_enable: bool,
    pub io_timeout: Duration,
}

/// Failures that abort the whole batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("batch is empty")]
    EmptyBatch,

    #[error("store failure: {0}")]
    Store(#[from] DbError),

    #[error("manifest write failed: {0}")]
    ManifestWrite(#[from] StorageError),

    #[error("manifest serialization failed: {0}")]
    ManifestSerialize(#[from] serde_json::Error),
}

/// Outcome for one item of a batch.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub ordinal: u32,
    pub kind: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub file_id: String,
    pub file_unique_id: String,
    pub original_filename: Option<String>,
    pub sha256: Option<String>,
    pub s3_key: Option<String>,
    pub is_duplicate: bool,
    pub skipped_reason: Option<SkipReason>,
}

/// Result of processing one batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub base_path: String,
    pub outcomes: Vec<ItemOutcome>,
    pub duplicate_of: Option<String>,
    pub dedup_reason: Option<DedupReason>,
    pub total_bytes_uploaded: u64,
    pub notes: Option<String>,
}

impl BatchResult {
    /// Items archived or recognized as duplicates of archived content.
    pub fn successful(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.s3_key.is_some() && o.skipped_reason.is_none())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.skipped_reason.is_some())
    }
}

/// Process one ready batch end to end.
pub async fn process_batch(
    config: &PipelineConfig,
    store: &ArchiveDb,
    sink: &dyn ObjectSink,
    transport: &dyn MediaTransport,
    mut batch: Batch,
) -> Result<BatchResult, PipelineError> {
    if batch.messages.is_empty() {
        return Err(PipelineError::EmptyBatch);
    }
    let started = Instant::now();
    batch.sort_by_timestamp();

    let first = batch.first().clone();
    let origin_slug = to_safe_slug(&first.origin_name());
    let base_path = message_base_prefix(first.timestamp, &origin_slug, first.message_id);

    let mut result = BatchResult {
        base_path: base_path.clone(),
        outcomes: Vec::with_capacity(batch.messages.len()),
        duplicate_of: None,
        dedup_reason: None,
        total_bytes_uploaded: 0,
        notes: None,
    };

    for (index, message) in batch.messages.iter().enumerate() {
        let ordinal = (index + 1) as u32;

        let Some(media) = message.media.clone() else {
            result.outcomes.push(no_media_outcome(ordinal));
            METRICS.inc_skipped_items();
            continue;
        };

        let mut outcome = base_outcome(ordinal, &media);

        // Fast-path dedup by source unique id.
        if config.dedup_enable {
            let check = store.check_by_unique(&media.file_unique_id).await?;
            if check.hit {
                METRICS.inc_dedup_hits();
                result.duplicate_of = check.existing_key.clone();
                result.dedup_reason = Some(DedupReason::FileUniqueId);
                outcome.is_duplicate = true;
                outcome.s3_key = check.existing_key;
                result.outcomes.push(outcome);
                continue;
            }
        }

        // Pre-download size gate on the declared size.
        if let Some(declared) = media.declared_size {
            if let Some(reason) = size_gate(declared, config) {
                outcome.skipped_reason = Some(reason);
                result.outcomes.push(outcome);
                METRICS.inc_skipped_items();
                continue;
            }
        }

        // Acquire into a temp file, hashing along the way. The temp file is
        // removed on every exit path by the guard's Drop.
        let temp = match tempfile::Builder::new()
            .prefix("teltubby_")
            .tempfile()
        {
            Ok(temp) => temp,
            Err(e) => {
                warn!("temp file creation failed: {e}");
                outcome.skipped_reason = Some(SkipReason::DownloadFailed);
                result.outcomes.push(outcome);
                METRICS.inc_skipped_items();
                continue;
            }
        };

        let acquired = match tokio::time::timeout(
            config.io_timeout,
            transport.acquire(&media.file_id, temp.path()),
        )
        .await
        {
            Ok(Ok(acquired)) => acquired,
            Ok(Err(TransportError::TooBig)) => {
                outcome.skipped_reason = Some(SkipReason::ExceedsBotLimit);
                result.outcomes.push(outcome);
                METRICS.inc_skipped_items();
                continue;
            }
            Ok(Err(e)) => {
                warn!("download failed for {}: {e}", media.file_unique_id);
                outcome.skipped_reason = Some(SkipReason::DownloadFailed);
                result.outcomes.push(outcome);
                METRICS.inc_skipped_items();
                continue;
            }
            Err(_) => {
                warn!("download timed out for {}", media.file_unique_id);
                outcome.skipped_reason = Some(SkipReason::DownloadFailed);
                result.outcomes.push(outcome);
                METRICS.inc_skipped_items();
                continue;
            }
        };

        outcome.size_bytes = Some(acquired.size);
        outcome.sha256 = Some(acquired.sha256.clone());

        // Re-apply the gate against actual bytes.
        if let Some(reason) = size_gate(acquired.size, config) {
            outcome.skipped_reason = Some(reason);
            result.outcomes.push(outcome);
            METRICS.inc_skipped_items();
            continue;
        }

        // Content-hash dedup after acquisition.
        if config.dedup_enable {
            let check = store.check_by_hash(&acquired.sha256).await?;
            if check.hit {
                METRICS.inc_dedup_hits();
                result.duplicate_of = check.existing_key.clone();
                result.dedup_reason = Some(DedupReason::Sha256);
                outcome.is_duplicate = true;
                outcome.s3_key = check.existing_key;
                result.outcomes.push(outcome);
                continue;
            }
        }

        // Deterministic key, fixed-length upload.
        let filename = build_filename(
            first.timestamp,
            &origin_slug,
            &message.sender_name(),
            first.message_id,
            first.media_group_id.as_deref(),
            ordinal,
            message.caption.as_deref(),
            &media.extension(),
        );
        let key = format!("{base_path}{filename}");
        let content_type = media.content_type();

        if let Err(e) = sink
            .put_file(&key, temp.path(), acquired.size, content_type.as_deref())
            .await
        {
            warn!("upload failed for {key}: {e}");
            outcome.skipped_reason = Some(SkipReason::UploadFailed);
            result.outcomes.push(outcome);
            METRICS.inc_skipped_items();
            continue;
        }

        store
            .record(
                &acquired.sha256,
                &key,
                acquired.size,
                content_type.as_deref(),
                Some(&media.file_unique_id),
            )
            .await?;
        METRICS.add_ingested_bytes(acquired.size);

        debug!("archived {key} ({} bytes)", acquired.size);
        outcome.s3_key = Some(key);
        result.outcomes.push(outcome);
    }

    result.total_bytes_uploaded = result
        .outcomes
        .iter()
        .filter(|o| o.s3_key.is_some() && !o.is_duplicate && o.skipped_reason.is_none())
        .filter_map(|o| o.size_bytes)
        .sum();

    // The manifest is written after all successful item uploads; failing to
    // write it fails the batch.
    let manifest = build_manifest(sink.bucket(), &batch, &result);
    let body = serde_json::to_vec(&manifest)?;
    sink.put_bytes(
        &format!("{base_path}message.json"),
        Bytes::from(body),
        Some("application/json"),
    )
    .await?;

    METRICS.inc_ingested_messages();
    METRICS.observe_processing(started.elapsed());
    Ok(result)
}

fn size_gate(size: u64, config: &PipelineConfig) -> Option<SkipReason> {
    if size > config.small_path_limit_bytes {
        Some(SkipReason::ExceedsBotLimit)
    } else if size > config.max_file_bytes {
        Some(SkipReason::ExceedsCfgLimit)
    } else {
        None
    }
}

fn base_outcome(ordinal: u32, media: &MediaItem) -> ItemOutcome {
    ItemOutcome {
        ordinal,
        kind: media.kind.as_str().to_string(),
        mime_type: media.content_type(),
        size_bytes: media.declared_size,
        width: media.width,
        height: media.height,
        duration: media.duration,
        file_id: media.file_id.clone(),
        file_unique_id: media.file_unique_id.clone(),
        original_filename: media.file_name.clone(),
        sha256: None,
        s3_key: None,
        is_duplicate: false,
        skipped_reason: None,
    }
}

fn no_media_outcome(ordinal: u32) -> ItemOutcome {
    ItemOutcome {
        ordinal,
        kind: "unknown".to_string(),
        mime_type: None,
        size_bytes: None,
        width: None,
        height: None,
        duration: None,
        file_id: String::new(),
        file_unique_id: String::new(),
        original_filename: None,
        sha256: None,
        s3_key: None,
        is_duplicate: false,
        skipped_reason: Some(SkipReason::NoMedia),
    }
}

fn build_manifest(bucket: &str, batch: &Batch, result: &BatchResult) -> ManifestV1 {
    let first = batch.first();
    let keys: Vec<String> = result
        .outcomes
        .iter()
        .filter_map(|o| o.s3_key.clone())
        .collect();

    let items = result
        .outcomes
        .iter()
        .map(|o| ManifestItem {
            ordinal: o.ordinal,
            kind: o.kind.clone(),
            mime_type: o.mime_type.clone(),
            size_bytes: o.size_bytes,
            width: o.width,
            height: o.height,
            duration: o.duration,
            file_id: o.file_id.clone(),
            file_unique_id: o.file_unique_id.clone(),
            original_filename: o.original_filename.clone(),
            sha256: o.sha256.clone(),
            s3_key: o.s3_key.clone(),
        })
        .collect();

    ManifestV1 {
        schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
        archive_timestamp_utc: now_iso(),
        message_timestamp_utc: format_iso(first.timestamp),
        bucket: bucket.to_string(),
        base_path: result.base_path.clone(),
        files_count: keys.len() as u32,
        total_bytes_uploaded: result.total_bytes_uploaded,
        keys,
        duplicate_of: result.duplicate_of.clone(),
        dedup_reason: result.dedup_reason.map(|r| r.as_str().to_string()),
        notes: result.notes.clone(),
        telegram: ManifestTelegram {
            message_id: first.message_id.to_string(),
            media_group_id: first.media_group_id.clone(),
            chat_id: first.chat_id.to_string(),
            chat_title: first.chat_title.clone(),
            chat_username: first.chat_username.clone(),
            sender_id: first.sender_id.to_string(),
            sender_username: first.sender_username.clone(),
            forward_origin: first.forward_origin.clone(),
            caption_plain: first.caption.clone(),
            caption_entities: first.caption_entities.clone(),
            entities: first.entities.clone(),
            items,
        },
    }
}
