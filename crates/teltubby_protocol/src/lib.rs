//! Shared vocabulary for the teltubby archive service.
//!
//! Everything the bot front-end, ingestion pipeline, job queue and large-file
//! worker agree on lives here: media and batch types, job states and the job
//! message wire format, the manifest JSON schema, deterministic key/name
//! construction, configuration, and the process-wide metrics registry.

pub mod config;
pub mod defaults;
pub mod metrics;
pub mod naming;
pub mod status;
pub mod types;

// Re-export types for convenience
pub use types::{
    Batch,
    BatchMessage,
    DedupReason,
    JobFileInfo,
    JobMessage,
    JobMetadata,
    JobState,
    JobTelegramContext,
    ManifestItem,
    ManifestTelegram,
    ManifestV1,
    MediaItem,
    MediaKind,
    PayloadError,
    SkipReason,
};

pub use config::AppConfig;
pub use naming::{build_filename, caption_snippet, message_base_prefix, to_safe_slug};
pub use status::{StatusFile, WorkerState, WorkerStatus};

use chrono::{DateTime, Utc};

/// Render a timestamp the way every persistent row and manifest does.
pub fn format_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Current UTC time in the persistent row format.
pub fn now_iso() -> String {
    format_iso(Utc::now())
}

/// Generate a new version-4 job id.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_iso_is_second_precision_zulu() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_iso(ts), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn job_ids_are_uuid_v4() {
        let id = new_job_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(new_job_id(), id);
    }
}
