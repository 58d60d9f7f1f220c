//! Object storage for the archive: bucket adapter and quota tracking.

pub mod quota;
pub mod s3;
pub mod sink;

pub use quota::QuotaTracker;
pub use s3::{BucketClient, ObjectStat, S3Config, StorageError};
pub use sink::ObjectSink;

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, StorageError>;
