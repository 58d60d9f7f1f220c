//! Narrow upload seam over the bucket adapter.
//!
//! The pipeline and worker only ever put bytes or a finished temp file;
//! keeping that behind a trait lets their tests run without a bucket.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::s3::{BucketClient, StorageError};

/// The object-store surface the ingestion paths need.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
impl ObjectSink for BucketClient {
    fn bucket(&self) -> &str {
        BucketClient::bucket(self)
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.upload_bytes(key, data, content_type).await
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.upload_file(key, path, length, content_type).await
    }
}
