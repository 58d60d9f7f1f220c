//! Small-path acquisition over the Bot API.
//!
//! Downloads stream into a temp file through a hashing writer so the content
//! hash is ready the moment the download completes.

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use teloxide::net::Download;
use teloxide::prelude::*;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use teltubby_ingest::{AcquiredFile, MediaTransport, ProbeOutcome, TransportError};

pub struct BotApiTransport {
    bot: Bot,
}

impl BotApiTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// The platform reports oversize files with a plain-text API error.
fn is_too_big(error: &teloxide::RequestError) -> bool {
    error.to_string().to_lowercase().contains("file is too big")
}

#[async_trait]
impl MediaTransport for BotApiTransport {
    async fn probe(&self, file_id: &str) -> Result<ProbeOutcome, TransportError> {
        match self.bot.get_file(file_id.to_string()).await {
            Ok(file) => Ok(ProbeOutcome::Available {
                size: Some(file.meta.size as u64),
            }),
            Err(e) if is_too_big(&e) => Ok(ProbeOutcome::TooBig),
            // Other failures are not a routing signal; the declared size
            // still gates the item downstream.
            Err(_) => Ok(ProbeOutcome::Available { size: None }),
        }
    }

    async fn acquire(&self, file_id: &str, dest: &Path) -> Result<AcquiredFile, TransportError> {
        let file = self.bot.get_file(file_id.to_string()).await.map_err(|e| {
            if is_too_big(&e) {
                TransportError::TooBig
            } else {
                TransportError::Download(e.to_string())
            }
        })?;

        let out = tokio::fs::File::create(dest).await?;
        let mut writer = HashingWriter::new(out);
        self.bot
            .download_file(&file.path, &mut writer)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        writer.inner.flush().await?;

        Ok(AcquiredFile {
            size: writer.written,
            sha256: format!("{:x}", writer.hasher.finalize()),
        })
    }
}

/// AsyncWrite adapter that feeds every written byte into SHA-256.
struct HashingWriter {
    inner: tokio::fs::File,
    hasher: Sha256,
    written: u64,
}

impl HashingWriter {
    fn new(inner: tokio::fs::File) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }
}

impl AsyncWrite for HashingWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_writer_tracks_bytes_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut writer = HashingWriter::new(file);

        writer.write_all(b"abc").await.unwrap();
        writer.inner.flush().await.unwrap();

        assert_eq!(writer.written, 3);
        assert_eq!(
            format!("{:x}", writer.hasher.finalize()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}
