//! Small-path acquisition contract.
//!
//! The bot crate implements `MediaTransport` over the Bot API; tests use an
//! in-memory one. Uploads go through `teltubby_storage::ObjectSink`.

use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub use teltubby_storage::ObjectSink;

/// Transport-level failures surfaced as per-item outcomes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The platform refuses to serve the file over the small path.
    #[error("file is too big for the small path")]
    TooBig,

    #[error("download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of probing a file id for small-path acquirability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Acquirable; the platform may report a better size than the message.
    Available { size: Option<u64> },
    /// The platform reports the file is beyond the small-path limit.
    TooBig,
}

/// A file acquired to disk, hashed while it was written.
#[derive(Debug, Clone)]
pub struct AcquiredFile {
    pub size: u64,
    pub sha256: String,
}

/// Small-path acquisition contract.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Ask the platform whether the file is acquirable over the small path.
    async fn probe(&self, file_id: &str) -> Result<ProbeOutcome, TransportError>;

    /// Acquire the content into `dest`, returning size and content hash.
    async fn acquire(&self, file_id: &str, dest: &Path) -> Result<AcquiredFile, TransportError>;
}

/// Write `data` to `dest` computing SHA-256 along the way.
///
/// Shared by transport implementations; the small path acquires chunked in
/// memory, so hashing happens on the same pass as the write.
pub async fn write_and_hash(dest: &Path, data: &[u8]) -> Result<AcquiredFile, TransportError> {
    let mut hasher = Sha256::new();
    let mut file = tokio::fs::File::create(dest).await?;
    for chunk in data.chunks(1024 * 1024) {
        hasher.update(chunk);
        file.write_all(chunk).await?;
    }
    file.flush().await?;
    Ok(AcquiredFile {
        size: data.len() as u64,
        sha256: format!("{:x}", hasher.finalize()),
    })
}
