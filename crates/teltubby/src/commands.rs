//! Administrative command surface.
//!
//! Every command is whitelist-gated; non-whitelisted users get silence.

use std::path::Path;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::{BotCommands, ParseError};
use tracing::{info, warn};

use teltubby_protocol::defaults::{JOB_PRIORITY, SECRET_CODE_KEY, SECRET_PASSWORD_KEY};
use teltubby_protocol::metrics::METRICS;
use teltubby_protocol::{now_iso, JobMessage, JobState, StatusFile};

use crate::context::AppContext;
use crate::format;
use crate::routing::send_markdown;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn accept_rest(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    Start,
    Help,
    Status,
    Quota,
    Mode,
    DbMaint,
    #[command(parse_with = accept_rest)]
    Mtcode(String),
    #[command(parse_with = accept_rest)]
    Mtpass(String),
    Mtstatus,
    Queue,
    #[command(parse_with = accept_rest)]
    Jobs(String),
    #[command(parse_with = accept_rest)]
    Retry(String),
    #[command(parse_with = accept_rest)]
    Cancel(String),
    #[command(parse_with = accept_rest)]
    Purge(String),
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<AppContext>,
) -> HandlerResult {
    let user_id = msg.from().map(|u| u.id.0 as i64);
    if !ctx.config.is_whitelisted(user_id) {
        return Ok(());
    }
    let chat_id = msg.chat.id;

    match cmd {
        Command::Start => {
            send_markdown(&bot, chat_id, &format::start(), None).await;
        }
        Command::Help => {
            send_markdown(&bot, chat_id, &format::help(), None).await;
        }
        Command::Status => {
            let used_ratio = ctx.quota.used_ratio().await;
            let depth = ctx.queue.depth().await.ok();
            let text = format::status(&ctx.config.telegram_mode, used_ratio, depth);
            send_markdown(&bot, chat_id, &text, None).await;
        }
        Command::Quota => {
            let text = match ctx.quota.used_ratio().await {
                Some(ratio) => format::quota(ratio),
                None => format::quota_unknown(),
            };
            send_markdown(&bot, chat_id, &text, None).await;
        }
        Command::Mode => {
            send_markdown(&bot, chat_id, &format::mode(&ctx.config.telegram_mode), None).await;
        }
        Command::DbMaint => {
            ctx.db.vacuum().await?;
            send_markdown(&bot, chat_id, &format::db_maint_done(), None).await;
        }
        Command::Mtcode(code) => {
            if code.is_empty() {
                send_markdown(&bot, chat_id, "Usage: /mtcode <code>", None).await;
            } else {
                ctx.db.set_secret(SECRET_CODE_KEY, &code, &now_iso()).await?;
                send_markdown(&bot, chat_id, "Verification code stored.", None).await;
            }
        }
        Command::Mtpass(password) => {
            if password.is_empty() {
                send_markdown(&bot, chat_id, "Usage: /mtpass <password>", None).await;
            } else {
                ctx.db.set_secret(SECRET_PASSWORD_KEY, &password, &now_iso()).await?;
                send_markdown(&bot, chat_id, "2FA password stored.", None).await;
            }
        }
        Command::Mtstatus => {
            let status = StatusFile::read(Path::new(&ctx.config.worker_status_path));
            send_markdown(&bot, chat_id, &format::mtstatus(status), None).await;
        }
        Command::Queue => {
            let jobs = ctx.db.list_jobs(20).await?;
            if jobs.is_empty() {
                send_markdown(&bot, chat_id, "Queue is empty.", None).await;
                return Ok(());
            }
            let mut lines = vec!["📬 *Recent jobs*".to_string()];
            for job in jobs {
                let error = job
                    .last_error
                    .as_deref()
                    .map(|e| format!(" - {}", truncate(e, 60)))
                    .unwrap_or_default();
                lines.push(format!(
                    "• `{}` [{}] prio={}{}\n  🔍 /jobs {}  🔁 /retry {}  🚫 /cancel {}",
                    job.job_id, job.state, job.priority, error, job.job_id, job.job_id, job.job_id
                ));
            }
            send_markdown(&bot, chat_id, &lines.join("\n"), None).await;
        }
        Command::Jobs(job_id) => {
            if job_id.is_empty() {
                send_markdown(&bot, chat_id, "Usage: /jobs <job_id>", None).await;
                return Ok(());
            }
            let Some(job) = ctx.db.get_job(&job_id).await? else {
                send_markdown(&bot, chat_id, "Job not found.", None).await;
                return Ok(());
            };
            let attempts = ctx.db.list_attempts(&job_id).await?.len();
            let text = format!(
                "🔍 *Job details*\n\n`{}`\n• State: {}  • Priority: {}\n• Chat: {}  • Msg: {}\n• Created: {}\n• Updated: {}\n• Attempts: {}\n• Last error: {}\n\n🔁 /retry {}   🚫 /cancel {}",
                job.job_id,
                job.state,
                job.priority,
                job.chat_id,
                job.message_id,
                job.created_at,
                job.updated_at,
                attempts,
                job.last_error.as_deref().unwrap_or("-"),
                job.job_id,
                job.job_id,
            );
            send_markdown(&bot, chat_id, &text, None).await;
        }
        Command::Retry(job_id) => {
            if job_id.is_empty() {
                send_markdown(&bot, chat_id, "Usage: /retry <job_id>", None).await;
                return Ok(());
            }
            retry_job(&bot, chat_id, &ctx, &job_id).await?;
        }
        Command::Cancel(job_id) => {
            if job_id.is_empty() {
                send_markdown(&bot, chat_id, "Usage: /cancel <job_id>", None).await;
                return Ok(());
            }
            ctx.db
                .update_job_state(&job_id, JobState::Cancelled, None, &now_iso())
                .await?;
            send_markdown(&bot, chat_id, &format!("Cancelled job {job_id}."), None).await;
        }
        Command::Purge(confirm) => {
            if confirm != "confirm" {
                send_markdown(&bot, chat_id, &format::purge_warning(), None).await;
                return Ok(());
            }
            purge_everything(&bot, chat_id, &ctx).await;
        }
    }
    Ok(())
}

/// Re-publish a failed or cancelled job from its stored payload.
async fn retry_job(
    bot: &Bot,
    chat_id: ChatId,
    ctx: &AppContext,
    job_id: &str,
) -> HandlerResult {
    let Some(job) = ctx.db.get_job(job_id).await? else {
        send_markdown(bot, chat_id, "Job not found.", None).await;
        return Ok(());
    };
    if !job.state.can_retry() {
        let text = format!("Job {job_id} is {}, cannot retry.", job.state);
        send_markdown(bot, chat_id, &text, None).await;
        return Ok(());
    }
    let Some(payload_json) = job.payload_json.as_deref() else {
        send_markdown(bot, chat_id, "No payload stored; cannot retry.", None).await;
        return Ok(());
    };
    let payload: JobMessage = serde_json::from_str(payload_json)?;

    ctx.queue.publish(&payload, JOB_PRIORITY).await?;
    ctx.db
        .update_job_state(job_id, JobState::Pending, None, &now_iso())
        .await?;
    METRICS.inc_jobs_retried();
    info!("re-queued job {job_id}");
    send_markdown(bot, chat_id, &format!("Re-queued job {job_id}."), None).await;
    Ok(())
}

/// Wipe bucket, store and queues. The literal `confirm` argument is the only
/// gate.
async fn purge_everything(bot: &Bot, chat_id: ChatId, ctx: &AppContext) {
    send_markdown(bot, chat_id, "🔄 Purging storage, store and queues...", None).await;
    let mut lines = vec!["✅ *System purge complete*".to_string(), String::new()];

    match ctx.bucket.purge_bucket().await {
        Ok(count) => lines.push(format!("🗂 Storage: {count} objects deleted")),
        Err(e) => {
            warn!("bucket purge failed: {e}");
            lines.push(format!("❌ Storage purge failed: {e}"));
        }
    }
    match ctx.db.purge_all().await {
        Ok(counts) => {
            let summary: Vec<String> =
                counts.iter().map(|(table, n)| format!("{table}={n}")).collect();
            lines.push(format!("🗄 Store: {}", summary.join(", ")));
        }
        Err(e) => {
            warn!("store purge failed: {e}");
            lines.push(format!("❌ Store purge failed: {e}"));
        }
    }
    match ctx.queue.purge().await {
        Ok(count) => lines.push(format!("📥 Queues: {count} messages purged")),
        Err(e) => {
            warn!("queue purge failed: {e}");
            lines.push(format!("❌ Queue purge failed: {e}"));
        }
    }

    send_markdown(bot, chat_id, &lines.join("\n"), None).await;
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preserves_short_text() {
        assert_eq!(truncate("short", 60), "short");
        let long = "x".repeat(100);
        let cut = truncate(&long, 60);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.len(), 63);
    }

    #[test]
    fn commands_parse_with_and_without_args() {
        use teloxide::utils::command::BotCommands;

        assert!(matches!(
            Command::parse("/mtcode 123456", "bot"),
            Ok(Command::Mtcode(code)) if code == "123456"
        ));
        assert!(matches!(
            Command::parse("/purge", "bot"),
            Ok(Command::Purge(arg)) if arg.is_empty()
        ));
        assert!(matches!(
            Command::parse("/purge confirm", "bot"),
            Ok(Command::Purge(arg)) if arg == "confirm"
        ));
        assert!(matches!(Command::parse("/db_maint", "bot"), Ok(Command::DbMaint)));
    }
}
