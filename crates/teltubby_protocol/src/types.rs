//! Canonical data types shared across the archive service.
//!
//! Media and batch descriptors are the bot-facing input model, job types are
//! the queue wire format, and the manifest types are the JSON artifact written
//! next to every archived batch. Every manifest field is serialized even when
//! absent (`null`), so downstream readers get a stable shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::defaults;

// ============================================================================
// Media model
// ============================================================================

/// Declared media class of one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
    Animation,
    Sticker,
    VideoNote,
    Unknown,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Animation => "animation",
            MediaKind::Sticker => "sticker",
            MediaKind::VideoNote => "video_note",
            MediaKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of binary content attached to a message.
///
/// `file_unique_id` is stable across re-shares and drives fast-path dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub file_id: String,
    pub file_unique_id: String,
    pub kind: MediaKind,
    pub declared_size: Option<u64>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    /// Video stickers archive as webm, static ones as webp.
    pub video_sticker: bool,
}

impl MediaItem {
    /// Derive the archive filename extension for this item.
    pub fn extension(&self) -> String {
        match self.kind {
            MediaKind::Photo => "jpg".to_string(),
            MediaKind::Voice => "ogg".to_string(),
            MediaKind::Animation | MediaKind::VideoNote => "mp4".to_string(),
            MediaKind::Sticker => {
                if self.video_sticker { "webm" } else { "webp" }.to_string()
            }
            MediaKind::Document => self.name_extension("bin"),
            MediaKind::Video => self.name_extension("mp4"),
            MediaKind::Audio => self.name_extension("mp3"),
            MediaKind::Unknown => "bin".to_string(),
        }
    }

    /// Content type used for the object upload.
    pub fn content_type(&self) -> Option<String> {
        match self.kind {
            MediaKind::Photo => Some("image/jpeg".to_string()),
            _ => self.mime_type.clone(),
        }
    }

    fn name_extension(&self, fallback: &str) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// One received chat message, reduced to what the pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub chat_username: Option<String>,
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub media_group_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub caption: Option<String>,
    pub caption_entities: Vec<Value>,
    pub entities: Vec<Value>,
    /// Forward origin as reported by the platform, kept verbatim.
    pub forward_origin: Option<Value>,
    /// Origin chat name extracted from the forward origin, when present.
    pub forward_origin_name: Option<String>,
    pub media: Option<MediaItem>,
}

impl BatchMessage {
    /// Source used for the origin slug: forward origin wins over the chat.
    pub fn origin_name(&self) -> String {
        if let Some(name) = &self.forward_origin_name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        self.chat_username
            .clone()
            .unwrap_or_else(|| self.chat_id.to_string())
    }

    pub fn sender_name(&self) -> String {
        self.sender_username
            .clone()
            .unwrap_or_else(|| self.sender_id.to_string())
    }
}

/// The pipeline's unit of work: one album, or one single-message album of one.
#[derive(Debug, Clone)]
pub struct Batch {
    pub messages: Vec<BatchMessage>,
}

impl Batch {
    pub fn new(messages: Vec<BatchMessage>) -> Self {
        Self { messages }
    }

    pub fn singleton(message: BatchMessage) -> Self {
        Self {
            messages: vec![message],
        }
    }

    /// First message in timestamp order; batches are never empty.
    pub fn first(&self) -> &BatchMessage {
        &self.messages[0]
    }

    pub fn group_id(&self) -> Option<&str> {
        self.messages[0].media_group_id.as_deref()
    }

    /// Order messages by source timestamp, message id as tie-break.
    pub fn sort_by_timestamp(&mut self) {
        self.messages
            .sort_by_key(|m| (m.timestamp, m.message_id));
    }
}

// ============================================================================
// Item outcomes
// ============================================================================

/// Why an item was skipped instead of archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoMedia,
    ExceedsBotLimit,
    ExceedsCfgLimit,
    DownloadFailed,
    UploadFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoMedia => "no_media",
            SkipReason::ExceedsBotLimit => "exceeds_bot_limit",
            SkipReason::ExceedsCfgLimit => "exceeds_cfg_limit",
            SkipReason::DownloadFailed => "download_failed",
            SkipReason::UploadFailed => "upload_failed",
        }
    }
}

/// How a duplicate was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupReason {
    FileUniqueId,
    Sha256,
}

impl DedupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupReason::FileUniqueId => "file_unique_id",
            DedupReason::Sha256 => "sha256",
        }
    }
}

// ============================================================================
// Job model
// ============================================================================

/// Large-file job lifecycle state.
///
/// PENDING -> PROCESSING -> COMPLETED | FAILED; FAILED/CANCELLED -> PENDING
/// only via explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Processing => "PROCESSING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Retrying => "RETRYING",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(JobState::Pending),
            "PROCESSING" => Some(JobState::Processing),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            "RETRYING" => Some(JobState::Retrying),
            "CANCELLED" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never change except through an explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Only failed or cancelled jobs may be re-queued.
    pub fn can_retry(self) -> bool {
        matches!(self, JobState::Failed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job message payload validation failure.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("priority {0} out of range 0..9")]
    PriorityOutOfRange(u8),
}

/// File descriptor carried inside a job message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFileInfo {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: Option<u64>,
    pub file_type: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Chat context carried for the manifest the worker will eventually write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTelegramContext {
    pub forward_origin: Option<Value>,
    pub caption: Option<String>,
    pub entities: Vec<Value>,
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub created_at: String,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// The large-file job wire format (schema 1.0).
///
/// Unknown fields are preserved on parse so newer producers do not break older
/// workers; the `schema` message header gates strictness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub file_info: JobFileInfo,
    pub telegram_context: JobTelegramContext,
    pub job_metadata: JobMetadata,
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, Value>,
}

impl JobMessage {
    /// Validate the required fields prior to publish.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.job_id.is_empty() {
            return Err(PayloadError::MissingField("job_id"));
        }
        if self.file_info.file_id.is_empty() {
            return Err(PayloadError::MissingField("file_info.file_id"));
        }
        if self.file_info.file_unique_id.is_empty() {
            return Err(PayloadError::MissingField("file_info.file_unique_id"));
        }
        if self.file_info.file_type.is_empty() {
            return Err(PayloadError::MissingField("file_info.file_type"));
        }
        if self.job_metadata.created_at.is_empty() {
            return Err(PayloadError::MissingField("job_metadata.created_at"));
        }
        if self.job_metadata.priority > defaults::JOB_MAX_PRIORITY {
            return Err(PayloadError::PriorityOutOfRange(self.job_metadata.priority));
        }
        Ok(())
    }
}

// ============================================================================
// Manifest (message.json) schema 1.0
// ============================================================================

/// Per-item metadata embedded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestItem {
    pub ordinal: u32,
    #[serde(rename = "type")]
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestTelegram {
    pub message_id: String,
    pub media_group_id: Option<String>,
    pub chat_id: String,
    pub chat_title: Option<String>,
    pub chat_username: Option<String>,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub forward_origin: Option<Value>,
    pub caption_plain: Option<String>,
    pub caption_entities: Vec<Value>,
    pub entities: Vec<Value>,
    pub items: Vec<ManifestItem>,
}

/// The JSON artifact written at `<base>/message.json` after item uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestV1 {
    pub schema_version: String,
    pub archive_timestamp_utc: String,
    pub message_timestamp_utc: String,
    pub bucket: String,
    pub base_path: String,
    pub files_count: u32,
    pub total_bytes_uploaded: u64,
    pub keys: Vec<String>,
    pub duplicate_of: Option<String>,
    pub dedup_reason: Option<String>,
    pub notes: Option<String>,
    pub telegram: ManifestTelegram,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: MediaKind, name: Option<&str>) -> MediaItem {
        MediaItem {
            file_id: "f".to_string(),
            file_unique_id: "u".to_string(),
            kind,
            declared_size: None,
            mime_type: None,
            file_name: name.map(|n| n.to_string()),
            width: None,
            height: None,
            duration: None,
            video_sticker: false,
        }
    }

    #[test]
    fn extension_by_kind() {
        assert_eq!(item(MediaKind::Photo, None).extension(), "jpg");
        assert_eq!(item(MediaKind::Voice, None).extension(), "ogg");
        assert_eq!(item(MediaKind::Animation, None).extension(), "mp4");
        assert_eq!(item(MediaKind::VideoNote, None).extension(), "mp4");
        assert_eq!(item(MediaKind::Sticker, None).extension(), "webp");

        let mut webm = item(MediaKind::Sticker, None);
        webm.video_sticker = true;
        assert_eq!(webm.extension(), "webm");
    }

    #[test]
    fn extension_from_declared_name() {
        assert_eq!(
            item(MediaKind::Document, Some("report.PDF")).extension(),
            "pdf"
        );
        assert_eq!(item(MediaKind::Document, None).extension(), "bin");
        assert_eq!(item(MediaKind::Video, Some("clip.mov")).extension(), "mov");
        assert_eq!(item(MediaKind::Video, Some("noext")).extension(), "mp4");
        assert_eq!(item(MediaKind::Audio, None).extension(), "mp3");
    }

    #[test]
    fn photo_content_type_is_fixed() {
        let mut photo = item(MediaKind::Photo, None);
        photo.mime_type = Some("application/octet-stream".to_string());
        assert_eq!(photo.content_type().as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn job_state_transitions() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.can_retry());
        assert!(JobState::Cancelled.can_retry());
        assert!(!JobState::Completed.can_retry());
        assert!(!JobState::Pending.is_terminal());
        assert_eq!(JobState::parse("PROCESSING"), Some(JobState::Processing));
        assert_eq!(JobState::parse("bogus"), None);
    }

    #[test]
    fn job_message_roundtrip_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "job_id": "a-b-c",
            "user_id": 1,
            "chat_id": 2,
            "message_id": 3,
            "file_info": {
                "file_id": "fid",
                "file_unique_id": "uid",
                "file_size": 123,
                "file_type": "video",
                "file_name": null,
                "mime_type": "video/mp4"
            },
            "telegram_context": {
                "forward_origin": null,
                "caption": null,
                "entities": [],
                "media_group_id": null
            },
            "job_metadata": {
                "created_at": "2024-01-02T03:04:05Z",
                "priority": 4,
                "retry_count": 0,
                "max_retries": 3
            },
            "future_field": {"x": 1}
        });
        let msg: JobMessage = serde_json::from_value(raw).unwrap();
        msg.validate().unwrap();
        assert!(msg.unknown.contains_key("future_field"));
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["future_field"]["x"], 1);
    }

    #[test]
    fn job_message_validation_rejects_missing_fields() {
        let mut msg = JobMessage {
            job_id: "j".to_string(),
            user_id: 0,
            chat_id: 0,
            message_id: 0,
            file_info: JobFileInfo {
                file_id: "f".to_string(),
                file_unique_id: "u".to_string(),
                file_size: None,
                file_type: "video".to_string(),
                file_name: None,
                mime_type: None,
            },
            telegram_context: JobTelegramContext {
                forward_origin: None,
                caption: None,
                entities: vec![],
                media_group_id: None,
            },
            job_metadata: JobMetadata {
                created_at: crate::now_iso(),
                priority: 4,
                retry_count: 0,
                max_retries: 3,
            },
            unknown: Default::default(),
        };
        assert!(msg.validate().is_ok());

        msg.file_info.file_unique_id.clear();
        assert!(matches!(
            msg.validate(),
            Err(PayloadError::MissingField("file_info.file_unique_id"))
        ));

        msg.file_info.file_unique_id = "u".to_string();
        msg.job_metadata.priority = 10;
        assert!(matches!(
            msg.validate(),
            Err(PayloadError::PriorityOutOfRange(10))
        ));
    }

    #[test]
    fn manifest_serializes_null_fields() {
        let manifest = ManifestV1 {
            schema_version: "1.0".to_string(),
            archive_timestamp_utc: "2024-01-02T03:04:06Z".to_string(),
            message_timestamp_utc: "2024-01-02T03:04:05Z".to_string(),
            bucket: "archive".to_string(),
            base_path: "teltubby/2024/01/chan-a/42/".to_string(),
            files_count: 0,
            total_bytes_uploaded: 0,
            keys: vec![],
            duplicate_of: None,
            dedup_reason: None,
            notes: None,
            telegram: ManifestTelegram {
                message_id: "42".to_string(),
                media_group_id: None,
                chat_id: "7".to_string(),
                chat_title: None,
                chat_username: None,
                sender_id: "9".to_string(),
                sender_username: None,
                forward_origin: None,
                caption_plain: None,
                caption_entities: vec![],
                entities: vec![],
                items: vec![],
            },
        };
        let value = serde_json::to_value(&manifest).unwrap();
        // Nullable fields must be present, not omitted.
        assert!(value.get("duplicate_of").is_some());
        assert!(value["duplicate_of"].is_null());
        assert!(value["telegram"].get("chat_title").is_some());
    }
}
