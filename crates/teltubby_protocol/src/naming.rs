//! Deterministic, filesystem-safe key and filename construction.
//!
//! Object keys are prefix-partitioned by
//! `teltubby/YYYY/MM/<origin-slug>/<message-id>/`; filenames follow
//! `YYYYMMDD-HHMMSS_<origin>_<sender>_m<mid>[-g<gid>]_<NNN>[_<caption>].<ext>`
//! with a 120-character cap that truncates the base, never the extension.

use chrono::{DateTime, Utc};
use deunicode::deunicode;

use crate::defaults::{KEY_ROOT, SAFE_MAX_FILENAME};

/// Number of caption word-tokens carried into the filename.
const CAPTION_SNIPPET_WORDS: usize = 6;

/// Transliterate to ASCII, lowercase, and collapse unsafe runs to `-`.
///
/// The output alphabet is `[a-z0-9._-]`; applying the function twice is a
/// no-op.
pub fn to_safe_slug(text: &str) -> String {
    let folded = deunicode(text).to_ascii_lowercase();
    let mut slug = String::with_capacity(folded.len());
    let mut pending_sep = false;
    for ch in folded.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-') {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// First six word-tokens of the transliterated caption, slugified.
pub fn caption_snippet(caption: Option<&str>) -> String {
    let Some(caption) = caption else {
        return String::new();
    };
    let folded = deunicode(caption);
    let words: Vec<&str> = folded
        .split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '\'' | '-')))
        .filter(|w| !w.is_empty())
        .take(CAPTION_SNIPPET_WORDS)
        .collect();
    if words.is_empty() {
        return String::new();
    }
    to_safe_slug(&words.join("-"))
}

/// Object key prefix for one batch: all items of the batch share it.
pub fn message_base_prefix(ts_utc: DateTime<Utc>, origin_slug: &str, message_id: i64) -> String {
    format!(
        "{}/{}/{}/{}/{}/",
        KEY_ROOT,
        ts_utc.format("%Y"),
        ts_utc.format("%m"),
        origin_slug,
        message_id
    )
}

/// Object key prefix for large-file worker uploads.
pub fn mtproto_base_prefix(ts_utc: DateTime<Utc>, message_id: i64) -> String {
    format!(
        "{}/{}/{}/mtproto/{}/",
        KEY_ROOT,
        ts_utc.format("%Y"),
        ts_utc.format("%m"),
        message_id
    )
}

/// Build the deterministic archive filename for one item.
#[allow(clippy::too_many_arguments)]
pub fn build_filename(
    message_ts_utc: DateTime<Utc>,
    origin_slug: &str,
    sender: &str,
    message_id: i64,
    media_group_id: Option<&str>,
    ordinal: u32,
    caption: Option<&str>,
    ext: &str,
) -> String {
    let ts = message_ts_utc.format("%Y%m%d-%H%M%S");
    let origin_part = to_safe_slug(origin_slug);
    let sender_part = if sender.is_empty() {
        "unknown".to_string()
    } else {
        to_safe_slug(sender)
    };
    let group_part = media_group_id
        .map(|gid| format!("-g{gid}"))
        .unwrap_or_default();
    let mut base = format!("{ts}_{origin_part}_{sender_part}_m{message_id}{group_part}_{ordinal:03}");
    let cap_part = caption_snippet(caption);
    if !cap_part.is_empty() {
        base.push('_');
        base.push_str(&cap_part);
    }

    let suffix_len = ext.len() + 1;
    if base.len() + suffix_len > SAFE_MAX_FILENAME {
        base.truncate(SAFE_MAX_FILENAME.saturating_sub(suffix_len));
    }
    format!("{base}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn is_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    }

    #[test]
    fn slug_basic() {
        assert_eq!(to_safe_slug("Chan A"), "chan-a");
        assert_eq!(to_safe_slug("alice_99"), "alice_99");
        assert_eq!(to_safe_slug("file.name-v2"), "file.name-v2");
    }

    #[test]
    fn slug_transliterates_cyrillic() {
        let slug = to_safe_slug("Канал Новости");
        assert!(is_safe(&slug), "unsafe slug: {slug}");
        assert!(!slug.is_empty());
    }

    #[test]
    fn slug_is_idempotent() {
        let inputs = [
            "Hello, World!",
            "Канал //// Тест",
            "  spaces  and\ttabs ",
            "emoji 🎥 video",
            "__under__score__",
            "ALL.CAPS-MIX_ed",
            "",
        ];
        for input in inputs {
            let once = to_safe_slug(input);
            assert!(is_safe(&once), "unsafe slug for {input:?}: {once}");
            assert_eq!(to_safe_slug(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn caption_snippet_takes_six_words() {
        let snippet = caption_snippet(Some("one two three four five six seven eight"));
        assert_eq!(snippet, "one-two-three-four-five-six");
        assert_eq!(caption_snippet(None), "");
        assert_eq!(caption_snippet(Some("!!! ???")), "");
    }

    #[test]
    fn base_prefix_layout() {
        assert_eq!(
            message_base_prefix(ts(), "chan-a", 42),
            "teltubby/2024/01/chan-a/42/"
        );
        assert_eq!(mtproto_base_prefix(ts(), 99), "teltubby/2024/01/mtproto/99/");
    }

    #[test]
    fn filename_scenario_shape() {
        let name = build_filename(ts(), "chan-a", "alice", 42, None, 1, None, "jpg");
        assert_eq!(name, "20240102-030405_chan-a_alice_m42_001.jpg");

        let grouped = build_filename(ts(), "chan-a", "alice", 43, Some("G1"), 2, None, "jpg");
        assert_eq!(grouped, "20240102-030405_chan-a_alice_m43-gG1_002.jpg");
    }

    #[test]
    fn filename_includes_caption_snippet() {
        let name = build_filename(
            ts(),
            "chan-a",
            "alice",
            42,
            None,
            1,
            Some("Look at this amazing sunset over the bay"),
            "jpg",
        );
        assert_eq!(
            name,
            "20240102-030405_chan-a_alice_m42_001_look-at-this-amazing-sunset-over.jpg"
        );
    }

    #[test]
    fn filename_caps_length_and_keeps_extension() {
        let long_caption = "word ".repeat(40);
        let name = build_filename(
            ts(),
            &"x".repeat(80),
            &"y".repeat(80),
            123456789,
            Some("1234567890123"),
            7,
            Some(&long_caption),
            "webm",
        );
        assert!(name.len() <= SAFE_MAX_FILENAME, "too long: {}", name.len());
        assert!(name.ends_with(".webm"));
    }
}
