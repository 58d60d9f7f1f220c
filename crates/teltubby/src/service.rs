//! Bot dispatch: message handling, album aggregation, periodic finalizer.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use teltubby_ingest::AddOutcome;
use teltubby_protocol::defaults::FLUSH_INTERVAL_SECONDS;
use teltubby_protocol::Batch;

use crate::commands::HandlerResult;
use crate::context::AppContext;
use crate::extract;
use crate::routing::handle_ready_batch;

/// Run one ready batch in its own task. Short-lived, cancellation-safe at
/// every await; concurrency is bounded by the context's ingest slots.
fn spawn_batch(bot: Bot, ctx: Arc<AppContext>, batch: Batch) {
    tokio::spawn(async move {
        handle_ready_batch(&ctx, &bot, batch).await;
    });
}

/// Media-message handler: DM-only, whitelist-gated, silent otherwise.
pub async fn on_message(bot: Bot, msg: Message, ctx: Arc<AppContext>) -> HandlerResult {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let user_id = msg.from().map(|u| u.id.0 as i64);
    if !ctx.config.is_whitelisted(user_id) {
        debug!("ignoring non-whitelisted user {user_id:?}");
        return Ok(());
    }
    if !extract::has_media_content(&msg) {
        return Ok(());
    }

    let message = extract::to_batch_message(&msg);
    info!(
        "media message {} (group {:?})",
        message.message_id, message.media_group_id
    );

    match ctx.albums.add(message) {
        AddOutcome::Ready(batch) => {
            spawn_batch(bot, ctx, batch);
        }
        AddOutcome::Pending => {
            debug!("message joined album bucket; waiting for the window");
        }
        AddOutcome::Flushed(batch) => {
            // The bucket expired as this message arrived: process the old
            // batch, then re-submit the newcomer into a fresh bucket.
            spawn_batch(bot.clone(), ctx.clone(), batch);
            let message = extract::to_batch_message(&msg);
            if let AddOutcome::Ready(batch) = ctx.albums.add(message) {
                spawn_batch(bot, ctx, batch);
            }
        }
    }
    Ok(())
}

/// Flush expired album buckets so ingestion continues when traffic stops.
pub fn spawn_finalizer(bot: Bot, ctx: Arc<AppContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("album finalizer loop started");
        loop {
            tokio::time::sleep(Duration::from_secs(FLUSH_INTERVAL_SECONDS)).await;
            for batch in ctx.albums.flush_ready() {
                info!(
                    "finalizer releasing batch of {} item(s)",
                    batch.messages.len()
                );
                spawn_batch(bot.clone(), ctx.clone(), batch);
            }
        }
    })
}
