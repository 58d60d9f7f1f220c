//! Default values shared by the bot and worker binaries.

/// Album aggregation window (seconds).
pub const ALBUM_WINDOW_SECONDS: u64 = 10;

/// Album flusher cadence (seconds).
pub const FLUSH_INTERVAL_SECONDS: u64 = 1;

/// Bot API small-path limit: 50 MiB.
pub const BOT_API_MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Configured hard cap: 4 GiB.
pub const MAX_FILE_GB: u64 = 4;

/// Default job priority on the large-file queue.
pub const JOB_PRIORITY: u8 = 4;

/// Highest priority the queue accepts (x-max-priority).
pub const JOB_MAX_PRIORITY: u8 = 9;

/// AMQP message type tag for large-file jobs.
pub const JOB_MESSAGE_TYPE: &str = "telarch.largefile.job";

/// Schema header carried on every job message.
pub const JOB_SCHEMA_VERSION: &str = "1.0";

/// Manifest JSON schema version.
pub const MANIFEST_SCHEMA_VERSION: &str = "1.0";

/// Object key namespace root.
pub const KEY_ROOT: &str = "teltubby";

/// Filename length cap (base truncated, extension preserved).
pub const SAFE_MAX_FILENAME: usize = 120;

pub const JOB_QUEUE_NAME: &str = "teltubby.large_files";
pub const JOB_DEAD_LETTER_QUEUE: &str = "teltubby.failed_jobs";
pub const JOB_EXCHANGE: &str = "teltubby.exchange";
pub const JOB_DLX_EXCHANGE: &str = "teltubby.dlx";

/// Auth secret keys recognized by the store.
pub const SECRET_CODE_KEY: &str = "code";
pub const SECRET_PASSWORD_KEY: &str = "password";

/// Freshness window for login codes (seconds). Codes are single-use.
pub const CODE_FRESHNESS_SECONDS: i64 = 10 * 60;

/// Freshness window for 2FA passwords (seconds). Passwords persist.
pub const PASSWORD_FRESHNESS_SECONDS: i64 = 60 * 60;

/// Session health probe interval (seconds).
pub const SESSION_PROBE_INTERVAL_SECONDS: u64 = 5 * 60;

/// Poll interval while waiting for an auth secret (seconds).
pub const SECRET_POLL_INTERVAL_SECONDS: u64 = 2;

/// Consecutive auth failures before the worker gives up and simulates.
pub const MAX_AUTH_FAILURES: u32 = 3;

/// Quota enumeration cache TTL (seconds).
pub const QUOTA_CACHE_TTL_SECONDS: u64 = 5 * 60;
