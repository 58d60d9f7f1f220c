//! Reduction of Bot API messages to the pipeline's input model.

use teloxide::types::{Forward, ForwardedFrom, MediaKind as TgMediaKind, Message, MessageKind};

use teltubby_protocol::{BatchMessage, MediaItem, MediaKind};

/// True when the message carries any archivable media.
pub fn has_media_content(message: &Message) -> bool {
    extract_media(message).is_some()
}

/// Reduce one incoming message to the batch model.
pub fn to_batch_message(message: &Message) -> BatchMessage {
    let forward = message.forward();
    BatchMessage {
        message_id: message.id.0 as i64,
        chat_id: message.chat.id.0,
        chat_title: message.chat.title().map(|t| t.to_string()),
        chat_username: message.chat.username().map(|u| u.to_string()),
        sender_id: message.from().map(|u| u.id.0 as i64).unwrap_or_default(),
        sender_username: message
            .from()
            .and_then(|u| u.username.clone()),
        media_group_id: message.media_group_id().map(|g| g.to_string()),
        timestamp: message.date,
        caption: message.caption().map(|c| c.to_string()),
        caption_entities: entities_json(message.caption_entities()),
        entities: entities_json(message.entities()),
        forward_origin: forward.and_then(|f| serde_json::to_value(f).ok()),
        forward_origin_name: forward.map(forward_origin_name),
        media: extract_media(message),
    }
}

fn entities_json(entities: Option<&[teloxide::types::MessageEntity]>) -> Vec<serde_json::Value> {
    entities
        .unwrap_or_default()
        .iter()
        .filter_map(|e| serde_json::to_value(e).ok())
        .collect()
}

/// Name used for the origin slug when the message was forwarded.
fn forward_origin_name(forward: &Forward) -> String {
    match &forward.from {
        ForwardedFrom::Chat(chat) => chat
            .username()
            .map(|u| u.to_string())
            .or_else(|| chat.title().map(|t| t.to_string()))
            .unwrap_or_else(|| chat.id.0.to_string()),
        ForwardedFrom::User(user) => user
            .username
            .clone()
            .unwrap_or_else(|| user.id.0.to_string()),
        ForwardedFrom::SenderName(name) => name.clone(),
    }
}

/// Pull the single media attachment out of a message, if any.
pub fn extract_media(message: &Message) -> Option<MediaItem> {
    let MessageKind::Common(common) = &message.kind else {
        return None;
    };

    match &common.media_kind {
        TgMediaKind::Photo(photo) => {
            // Telegram sends multiple renditions; archive the largest.
            let best = photo
                .photo
                .iter()
                .max_by_key(|p| (p.width as u64) * (p.height as u64))?;
            Some(MediaItem {
                file_id: best.file.id.clone(),
                file_unique_id: best.file.unique_id.clone(),
                kind: MediaKind::Photo,
                declared_size: Some(best.file.size as u64),
                mime_type: Some("image/jpeg".to_string()),
                file_name: None,
                width: Some(best.width),
                height: Some(best.height),
                duration: None,
                video_sticker: false,
            })
        }
        TgMediaKind::Document(document) => Some(MediaItem {
            file_id: document.document.file.id.clone(),
            file_unique_id: document.document.file.unique_id.clone(),
            kind: MediaKind::Document,
            declared_size: Some(document.document.file.size as u64),
            mime_type: document.document.mime_type.as_ref().map(|m| m.to_string()),
            file_name: document.document.file_name.clone(),
            width: None,
            height: None,
            duration: None,
            video_sticker: false,
        }),
        TgMediaKind::Video(video) => Some(MediaItem {
            file_id: video.video.file.id.clone(),
            file_unique_id: video.video.file.unique_id.clone(),
            kind: MediaKind::Video,
            declared_size: Some(video.video.file.size as u64),
            mime_type: video.video.mime_type.as_ref().map(|m| m.to_string()),
            file_name: video.video.file_name.clone(),
            width: Some(video.video.width),
            height: Some(video.video.height),
            duration: Some(video.video.duration as f64),
            video_sticker: false,
        }),
        TgMediaKind::Audio(audio) => Some(MediaItem {
            file_id: audio.audio.file.id.clone(),
            file_unique_id: audio.audio.file.unique_id.clone(),
            kind: MediaKind::Audio,
            declared_size: Some(audio.audio.file.size as u64),
            mime_type: audio.audio.mime_type.as_ref().map(|m| m.to_string()),
            file_name: audio.audio.file_name.clone(),
            width: None,
            height: None,
            duration: Some(audio.audio.duration as f64),
            video_sticker: false,
        }),
        TgMediaKind::Voice(voice) => Some(MediaItem {
            file_id: voice.voice.file.id.clone(),
            file_unique_id: voice.voice.file.unique_id.clone(),
            kind: MediaKind::Voice,
            declared_size: Some(voice.voice.file.size as u64),
            mime_type: voice.voice.mime_type.as_ref().map(|m| m.to_string()),
            file_name: None,
            width: None,
            height: None,
            duration: Some(voice.voice.duration as f64),
            video_sticker: false,
        }),
        TgMediaKind::Animation(animation) => Some(MediaItem {
            file_id: animation.animation.file.id.clone(),
            file_unique_id: animation.animation.file.unique_id.clone(),
            kind: MediaKind::Animation,
            declared_size: Some(animation.animation.file.size as u64),
            mime_type: animation
                .animation
                .mime_type
                .as_ref()
                .map(|m| m.to_string()),
            file_name: animation.animation.file_name.clone(),
            width: Some(animation.animation.width),
            height: Some(animation.animation.height),
            duration: Some(animation.animation.duration as f64),
            video_sticker: false,
        }),
        TgMediaKind::Sticker(sticker) => Some(MediaItem {
            file_id: sticker.sticker.file.id.clone(),
            file_unique_id: sticker.sticker.file.unique_id.clone(),
            kind: MediaKind::Sticker,
            declared_size: Some(sticker.sticker.file.size as u64),
            mime_type: None,
            file_name: None,
            width: Some(sticker.sticker.width as u32),
            height: Some(sticker.sticker.height as u32),
            duration: None,
            video_sticker: sticker.sticker.is_video(),
        }),
        TgMediaKind::VideoNote(note) => Some(MediaItem {
            file_id: note.video_note.file.id.clone(),
            file_unique_id: note.video_note.file.unique_id.clone(),
            kind: MediaKind::VideoNote,
            declared_size: Some(note.video_note.file.size as u64),
            mime_type: None,
            file_name: None,
            width: None,
            height: None,
            duration: Some(note.video_note.duration as f64),
            video_sticker: false,
        }),
        _ => None,
    }
}
