//! S3/MinIO bucket adapter.
//!
//! Thin wrapper over `object_store`'s S3 implementation tailored to our
//! config: path-style addressing for MinIO, optional TLS verification skip,
//! fixed-length uploads with multipart above the configured threshold, and
//! presigned GET urls.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bucket '{bucket}' is not reachable: {reason}. Create the bucket and check credentials/endpoint.")]
    BucketUnavailable { bucket: String, reason: String },

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

/// Bucket adapter configuration (plain data).
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: Option<String>,
    pub force_path_style: bool,
    pub tls_skip_verify: bool,
    pub multipart_threshold_mb: u64,
    pub multipart_part_size_mb: u64,
}

/// Minimal object metadata for `stat` and `list`.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
}

/// Shared, thread-safe bucket handle.
#[derive(Clone)]
pub struct BucketClient {
    store: AmazonS3,
    bucket: String,
    multipart_threshold: u64,
    part_size: usize,
}

impl BucketClient {
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".to_string()));
        }

        let mut client_options = ClientOptions::new().with_timeout_disabled();
        if config.tls_skip_verify {
            client_options = client_options.with_allow_invalid_certificates(true);
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(config.region.clone().unwrap_or_else(|| "us-east-1".to_string()))
            .with_virtual_hosted_style_request(!config.force_path_style)
            .with_allow_http(true)
            .with_client_options(client_options);
        if !config.endpoint.is_empty() {
            builder = builder.with_endpoint(&config.endpoint);
        }

        let store = builder.build()?;
        Ok(Self {
            store,
            bucket: config.bucket.clone(),
            multipart_threshold: config.multipart_threshold_mb.max(1) * 1024 * 1024,
            part_size: (config.multipart_part_size_mb.max(5) * 1024 * 1024) as usize,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Verify the bucket is reachable before serving traffic.
    ///
    /// `object_store` has no bucket-create call; a missing bucket is a fatal
    /// configuration error with remediation in the message.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        let mut listing = self.store.list(None);
        match listing.next().await {
            None | Some(Ok(_)) => {
                info!("Bucket '{}' reachable", self.bucket);
                Ok(())
            }
            Some(Err(e)) => Err(StorageError::BucketUnavailable {
                bucket: self.bucket.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Upload a whole in-memory object with its exact length.
    pub async fn upload_bytes(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = ObjectPath::from(key);
        let opts = PutOptions {
            attributes: attributes_for(content_type),
            ..Default::default()
        };
        self.store
            .put_opts(&path, PutPayload::from(data), opts)
            .await?;
        Ok(())
    }

    /// Upload a file from disk; switches to multipart above the threshold.
    ///
    /// `length` must match the on-disk size; it decides the upload strategy
    /// and lets the server enforce integrity on the single-shot path.
    pub async fn upload_file(
        &self,
        key: &str,
        file_path: &std::path::Path,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = ObjectPath::from(key);
        if length <= self.multipart_threshold {
            let data = tokio::fs::read(file_path).await?;
            if data.len() as u64 != length {
                warn!(
                    "size changed during upload of {key}: declared {length}, found {}",
                    data.len()
                );
            }
            return self.upload_bytes(key, Bytes::from(data), content_type).await;
        }

        let opts = PutMultipartOpts {
            attributes: attributes_for(content_type),
            ..Default::default()
        };
        let upload = self.store.put_multipart_opts(&path, opts).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.part_size);

        let mut file = tokio::fs::File::open(file_path).await?;
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            writer.write(&buf[..read]);
        }
        writer.finish().await?;
        Ok(())
    }

    pub async fn stat(&self, key: &str) -> Result<ObjectStat, StorageError> {
        let meta = self.store.head(&ObjectPath::from(key)).await?;
        Ok(ObjectStat {
            key: meta.location.to_string(),
            size: meta.size as u64,
        })
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }

    /// Presigned GET url for sharing an archived object.
    pub async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let url = self
            .store
            .signed_url(http::Method::GET, &ObjectPath::from(key), ttl)
            .await?;
        Ok(url.to_string())
    }

    /// Enumerate objects under a prefix (empty prefix lists the bucket).
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectStat>, StorageError> {
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(prefix))
        };
        let mut stream = self.store.list(prefix_path.as_ref());
        let mut out = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            out.push(ObjectStat {
                key: meta.location.to_string(),
                size: meta.size as u64,
            });
        }
        Ok(out)
    }

    /// Sum of object sizes in the bucket.
    pub async fn total_bytes(&self) -> Result<u64, StorageError> {
        let mut stream = self.store.list(None);
        let mut total = 0u64;
        while let Some(meta) = stream.next().await {
            total += meta?.size as u64;
        }
        Ok(total)
    }

    /// Delete every object in the bucket and return the count.
    ///
    /// Destructive; gated by the bot's `/purge confirm` command.
    pub async fn purge_bucket(&self) -> Result<u64, StorageError> {
        let objects = self.list("").await?;
        let mut deleted = 0u64;
        for object in objects {
            self.store.delete(&ObjectPath::from(object.key)).await?;
            deleted += 1;
        }
        info!("Purged {deleted} objects from bucket '{}'", self.bucket);
        Ok(deleted)
    }
}

fn attributes_for(content_type: Option<&str>) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(ct) = content_type {
        attributes.insert(Attribute::ContentType, ct.to_string().into());
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            endpoint: "http://127.0.0.1:9000".to_string(),
            access_key_id: "minio".to_string(),
            secret_access_key: "minio123".to_string(),
            bucket: "archive".to_string(),
            region: None,
            force_path_style: true,
            tls_skip_verify: false,
            multipart_threshold_mb: 8,
            multipart_part_size_mb: 16,
        }
    }

    #[test]
    fn builds_client_for_minio_style_config() {
        let client = BucketClient::new(&config()).unwrap();
        assert_eq!(client.bucket(), "archive");
        assert_eq!(client.multipart_threshold, 8 * 1024 * 1024);
    }

    #[test]
    fn rejects_empty_bucket() {
        let mut cfg = config();
        cfg.bucket.clear();
        assert!(matches!(
            BucketClient::new(&cfg),
            Err(StorageError::Config(_))
        ));
    }
}
