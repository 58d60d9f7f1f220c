//! Ready-batch handling: quota gate, small/large routing, pipeline hand-off.
//!
//! Items beyond the small path become queue jobs with a PENDING row persisted
//! before the publish is acknowledged to the user; the rest go through the
//! ingestion pipeline. Both the message handler and the album finalizer end
//! up here.

use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{error, info, warn};

use teltubby_ingest::{process_batch, MediaTransport, ProbeOutcome};
use teltubby_protocol::defaults::JOB_PRIORITY;
use teltubby_protocol::metrics::METRICS;
use teltubby_protocol::{
    new_job_id, now_iso, Batch, BatchMessage, JobFileInfo, JobMessage, JobMetadata, JobState,
    JobTelegramContext, MediaItem,
};

use crate::context::AppContext;
use crate::format;
use crate::typing::TypingGuard;

/// One byte over the small-path limit (or a platform "too big" verdict)
/// routes through the job system.
pub fn needs_large_path(declared: Option<u64>, probe: &ProbeOutcome, small_limit: u64) -> bool {
    if matches!(probe, ProbeOutcome::TooBig) {
        return true;
    }
    let size = match (declared, probe) {
        (Some(declared), ProbeOutcome::Available { size }) => Some(declared.max(size.unwrap_or(0))),
        (None, ProbeOutcome::Available { size }) => *size,
        (declared, _) => declared,
    };
    size.is_some_and(|s| s > small_limit)
}

fn build_job_message(
    message: &BatchMessage,
    media: &MediaItem,
    job_id: String,
    probed_size: Option<u64>,
    max_retries: u32,
) -> JobMessage {
    JobMessage {
        job_id,
        user_id: message.sender_id,
        chat_id: message.chat_id,
        message_id: message.message_id,
        file_info: JobFileInfo {
            file_id: media.file_id.clone(),
            file_unique_id: media.file_unique_id.clone(),
            file_size: media.declared_size.or(probed_size),
            file_type: media.kind.as_str().to_string(),
            file_name: media.file_name.clone(),
            mime_type: media.content_type(),
        },
        telegram_context: JobTelegramContext {
            forward_origin: message.forward_origin.clone(),
            caption: message.caption.clone(),
            entities: message.entities.clone(),
            media_group_id: message.media_group_id.clone(),
        },
        job_metadata: JobMetadata {
            created_at: now_iso(),
            priority: JOB_PRIORITY,
            retry_count: 0,
            max_retries,
        },
        unknown: Default::default(),
    }
}

/// Process one ready batch: gate, route, ingest, reply.
pub async fn handle_ready_batch(ctx: &AppContext, bot: &Bot, batch: Batch) {
    let Some(last) = batch.messages.last().cloned() else {
        return;
    };
    let chat_id = ChatId(last.chat_id);

    // Quota pause at 100%: refuse admission before any work.
    if ctx.quota.quota_configured() {
        if let Some(ratio) = ctx.quota.used_ratio().await {
            if ratio >= 1.0 {
                warn!("quota exhausted (ratio {ratio:.3}); refusing batch");
                send_markdown(bot, chat_id, &format::quota_pause(), None).await;
                return;
            }
        }
    }

    // Concurrency bound for acquire/upload work; batches queue here when
    // every slot is busy.
    let Ok(_slot) = ctx.ingest_slots.acquire().await else {
        return;
    };

    let _typing = TypingGuard::start(bot.clone(), chat_id);

    // Route oversize items to the job system before the pipeline runs.
    let mut queued_jobs: Vec<String> = Vec::new();
    let mut small_path: Vec<BatchMessage> = Vec::new();

    for message in batch.messages {
        let Some(media) = message.media.clone() else {
            small_path.push(message);
            continue;
        };

        let probe = match ctx.transport.probe(&media.file_id).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!("probe failed for {}: {e}", media.file_unique_id);
                ProbeOutcome::Available { size: None }
            }
        };
        if !needs_large_path(
            media.declared_size,
            &probe,
            ctx.pipeline.small_path_limit_bytes,
        ) {
            small_path.push(message);
            continue;
        }

        let probed_size = match probe {
            ProbeOutcome::Available { size } => size,
            ProbeOutcome::TooBig => None,
        };
        let job_id = new_job_id();
        let job = build_job_message(
            &message,
            &media,
            job_id.clone(),
            probed_size,
            ctx.config.worker_max_retries,
        );
        let payload_json = match serde_json::to_string(&job) {
            Ok(json) => json,
            Err(e) => {
                error!("job payload serialization failed: {e}");
                continue;
            }
        };

        if let Err(e) = ctx.queue.publish(&job, JOB_PRIORITY).await {
            error!("job publish failed for message {}: {e}", message.message_id);
            continue;
        }
        if let Err(e) = ctx
            .db
            .upsert_job(
                &job_id,
                job.user_id,
                job.chat_id,
                job.message_id,
                JobState::Pending,
                JOB_PRIORITY,
                &now_iso(),
                Some(&payload_json),
            )
            .await
        {
            error!("job row persist failed for {job_id}: {e}");
        }
        METRICS.inc_jobs_created();
        info!("routed message {} to the large path as {job_id}", message.message_id);
        queued_jobs.push(job_id);
    }

    if !queued_jobs.is_empty() {
        send_markdown(bot, chat_id, &format::jobs_queued(&queued_jobs), None).await;
    }

    if small_path.is_empty() {
        return;
    }
    let small_count = small_path.len();

    match process_batch(
        &ctx.pipeline,
        &ctx.db,
        &ctx.bucket,
        &ctx.transport,
        Batch::new(small_path),
    )
    .await
    {
        Ok(result) => {
            // Queued-job acks suppress the regular reply, matching the
            // one-response-per-batch contract.
            if !queued_jobs.is_empty() {
                return;
            }
            let successful = result.successful().count();
            let text = if successful == 0 && result.skipped().count() > 0 {
                format::ingestion_failed(&result)
            } else {
                format::ingestion_ack(&result)
            };
            send_markdown(bot, chat_id, &text, Some(last.message_id)).await;
        }
        Err(e) => {
            error!("batch processing failed: {e}");
            let text = format::processing_error(&e.to_string(), small_count);
            send_markdown(bot, chat_id, &text, None).await;
        }
    }
}

pub async fn send_markdown(bot: &Bot, chat_id: ChatId, text: &str, reply_to: Option<i64>) {
    let mut request = bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::Markdown);
    if let Some(message_id) = reply_to {
        request = request.reply_to_message_id(teloxide::types::MessageId(message_id as i32));
    }
    if let Err(e) = request.await {
        warn!("failed to send reply to {chat_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_limit_stays_on_the_small_path() {
        let limit = 50 * 1024 * 1024;
        let probe = ProbeOutcome::Available { size: None };
        assert!(!needs_large_path(Some(limit), &probe, limit));
        assert!(needs_large_path(Some(limit + 1), &probe, limit));
    }

    #[test]
    fn platform_too_big_forces_the_large_path() {
        let limit = 50 * 1024 * 1024;
        assert!(needs_large_path(Some(10), &ProbeOutcome::TooBig, limit));
        assert!(needs_large_path(None, &ProbeOutcome::TooBig, limit));
    }

    #[test]
    fn probe_size_can_override_a_missing_declaration() {
        let limit = 1024;
        let probe = ProbeOutcome::Available { size: Some(4096) };
        assert!(needs_large_path(None, &probe, limit));
        let probe = ProbeOutcome::Available { size: Some(512) };
        assert!(!needs_large_path(None, &probe, limit));
    }
}
