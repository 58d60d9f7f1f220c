//! Markdown reply formatting for the bot.

use teltubby_ingest::BatchResult;
use teltubby_protocol::{SkipReason, WorkerState, WorkerStatus};

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn start() -> String {
    "👋 *teltubby* archives media you forward here.\n\
     Send any photo, video or document and it lands in the archive bucket.\n\
     /help shows every command."
        .to_string()
}

pub fn help() -> String {
    "🤖 *teltubby commands*\n\n\
     /start - welcome message\n\
     /help - this reference\n\
     /status - system health and queue depth\n\
     /quota - storage usage against the configured quota\n\
     /mode - receive mode (polling/webhook)\n\
     /db\\_maint - run store maintenance (VACUUM)\n\n\
     *Large files (over 50MB)*\n\
     /mtcode <code> - submit the Telegram verification code\n\
     /mtpass <password> - submit the 2FA password\n\
     /mtstatus - large-file worker status\n\n\
     *Queue administration*\n\
     /queue - recent jobs\n\
     /jobs <id> - job details\n\
     /retry <id> - re-queue a failed or cancelled job\n\
     /cancel <id> - cancel a job (advisory)\n\
     /purge confirm - DESTRUCTIVE: wipe bucket, store and queues"
        .to_string()
}

pub fn ingestion_ack(result: &BatchResult) -> String {
    let successful: Vec<_> = result.successful().collect();
    let dedup_count = result.outcomes.iter().filter(|o| o.is_duplicate).count();
    let skipped_count = result.skipped().count();
    let mut media_types: Vec<&str> = successful.iter().map(|o| o.kind.as_str()).collect();
    media_types.sort_unstable();
    media_types.dedup();

    let mut lines = vec![
        "✅ *Archive complete*".to_string(),
        String::new(),
        format!("📦 Files: {}", successful.len()),
        format!("🗂 Types: {}", media_types.join(", ")),
        format!("💾 Size: {}", human_size(result.total_bytes_uploaded)),
        format!("📁 Path: `{}`", result.base_path),
    ];
    if dedup_count > 0 {
        lines.push(format!("♻️ Duplicates skipped: {dedup_count}"));
    }
    if skipped_count > 0 {
        lines.push(format!("⚠️ Items skipped: {skipped_count}"));
    }
    lines.join("\n")
}

pub fn ingestion_failed(result: &BatchResult) -> String {
    let mut reasons = Vec::new();
    for outcome in result.skipped() {
        let reason = match outcome.skipped_reason {
            Some(SkipReason::ExceedsBotLimit) => format!(
                "File {}: exceeds the 50MB bot limit ({})",
                outcome.ordinal,
                outcome
                    .size_bytes
                    .map(human_size)
                    .unwrap_or_else(|| "unknown size".to_string())
            ),
            Some(SkipReason::ExceedsCfgLimit) => format!(
                "File {}: exceeds the configured limit ({})",
                outcome.ordinal,
                outcome
                    .size_bytes
                    .map(human_size)
                    .unwrap_or_else(|| "unknown size".to_string())
            ),
            Some(SkipReason::DownloadFailed) => format!("File {}: download failed", outcome.ordinal),
            Some(SkipReason::UploadFailed) => format!("File {}: upload failed", outcome.ordinal),
            Some(SkipReason::NoMedia) => format!("File {}: no media content", outcome.ordinal),
            None => continue,
        };
        reasons.push(reason);
    }

    let detail = if reasons.is_empty() {
        "Unknown failure".to_string()
    } else {
        reasons.join("\n• ")
    };
    format!("❌ *Archive failed*\n\n• {detail}")
}

pub fn processing_error(reason: &str, item_count: usize) -> String {
    format!("❌ *Archive failed* ({item_count} items)\n\nProcessing error: {reason}")
}

pub fn jobs_queued(job_ids: &[String]) -> String {
    let mut lines = vec![
        "📨 *Queued for large-file processing*".to_string(),
        String::new(),
        "These files exceed the bot limit and will be archived by the worker.".to_string(),
    ];
    for id in job_ids {
        lines.push(format!("• `{id}`  🔍 /jobs {id}  🔁 /retry {id}  🚫 /cancel {id}"));
    }
    lines.join("\n")
}

pub fn status(mode: &str, used_ratio: Option<f64>, queue_depth: Option<u32>) -> String {
    let usage = match used_ratio {
        Some(ratio) => format!("{:.1}%", ratio * 100.0),
        None => "unknown".to_string(),
    };
    let mut lines = vec![
        "🤖 *teltubby status*".to_string(),
        String::new(),
        format!("📡 Mode: {mode}"),
        format!("🪣 Storage usage: {usage}"),
    ];
    if let Some(depth) = queue_depth {
        lines.push(format!("📬 Queue depth: {depth}"));
    }
    lines.join("\n")
}

pub fn quota(used_ratio: f64) -> String {
    let pct = used_ratio * 100.0;
    let emoji = if used_ratio >= 1.0 {
        "🛑"
    } else if pct >= 80.0 {
        "⚠️"
    } else {
        "✅"
    };
    format!("🪣 *Storage quota*\n\n{emoji} {pct:.1}% of the configured quota is used.")
}

pub fn quota_unknown() -> String {
    "Quota unknown (no bucket quota configured).".to_string()
}

pub fn quota_pause() -> String {
    "🛑 *Ingestion paused*\n\nThe storage quota is exhausted. Free space or raise the quota to resume archiving."
        .to_string()
}

pub fn mode(mode: &str) -> String {
    format!("📡 Mode: {mode}")
}

pub fn db_maint_done() -> String {
    "🧹 Store maintenance complete (VACUUM).".to_string()
}

pub fn purge_warning() -> String {
    "⚠️ *SYSTEM PURGE WARNING*\n\n\
     This command PERMANENTLY DELETES:\n\
     • every object in the storage bucket\n\
     • every store record (files, jobs, secrets)\n\
     • every queued job (including dead letters)\n\n\
     To proceed: `/purge confirm`"
        .to_string()
}

pub fn mtstatus(status: Option<WorkerStatus>) -> String {
    let Some(status) = status else {
        return "⚠️ *Worker status unknown*\n\nNo status file found. The large-file worker may not be running."
            .to_string();
    };

    let (emoji, headline) = match status.state {
        WorkerState::Healthy => ("✅", "Healthy - worker is fully operational"),
        WorkerState::Simulate => ("⚠️", "Simulate mode - large files are NOT downloaded"),
        WorkerState::Authenticating => ("🔄", "Authenticating - submit /mtcode when prompted"),
        WorkerState::Starting => ("🔄", "Starting up"),
        WorkerState::Stopped => ("🛑", "Stopped"),
        WorkerState::Error => ("❌", "Error state"),
    };

    let mut lines = vec![
        format!("{emoji} *Worker: {}*", headline),
        String::new(),
        format!(
            "• Authorized with Telegram: {}",
            if status.authorized { "yes" } else { "no" }
        ),
        format!(
            "• Jobs: {} completed, {} failed",
            status.jobs_completed, status.jobs_failed
        ),
    ];
    if let Some(activity) = &status.last_activity {
        lines.push(format!("• Last activity: {activity}"));
    }
    lines.push(format!("• Updated: {}", status.updated_at));
    lines.push(String::new());
    lines.push("Commands: /mtcode <code> · /mtpass <password> · /mtstatus".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_scales() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn mtstatus_without_file_warns() {
        let text = mtstatus(None);
        assert!(text.contains("status unknown"));
    }

    #[test]
    fn queued_jobs_carry_command_hints() {
        let text = jobs_queued(&["abc-123".to_string()]);
        assert!(text.contains("/jobs abc-123"));
        assert!(text.contains("/retry abc-123"));
        assert!(text.contains("/cancel abc-123"));
    }
}
