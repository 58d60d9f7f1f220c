//! Bucket quota tracking.
//!
//! When a quota is configured, used bytes are computed by summing object
//! sizes with a 5-minute cache. Enumeration failures fall back to the last
//! known value; with no prior value the ratio is unknown. Ingestion pauses
//! at ratio >= 1.0 (enforced by the dispatcher).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::s3::BucketClient;
use teltubby_protocol::defaults::QUOTA_CACHE_TTL_SECONDS;
use teltubby_protocol::metrics::METRICS;

struct QuotaCache {
    used_bytes: Option<u64>,
    refreshed_at: Option<Instant>,
}

pub struct QuotaTracker {
    bucket: BucketClient,
    quota_bytes: Option<u64>,
    cache_ttl: Duration,
    cache: Mutex<QuotaCache>,
}

impl QuotaTracker {
    pub fn new(bucket: BucketClient, quota_bytes: Option<u64>) -> Self {
        Self {
            bucket,
            quota_bytes,
            cache_ttl: Duration::from_secs(QUOTA_CACHE_TTL_SECONDS),
            cache: Mutex::new(QuotaCache {
                used_bytes: None,
                refreshed_at: None,
            }),
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn quota_configured(&self) -> bool {
        self.quota_bytes.is_some()
    }

    /// Used bytes, served from cache within the TTL.
    pub async fn used_bytes(&self) -> Option<u64> {
        {
            let cache = self.cache.lock().expect("quota cache poisoned");
            if let (Some(bytes), Some(at)) = (cache.used_bytes, cache.refreshed_at) {
                if at.elapsed() < self.cache_ttl {
                    return Some(bytes);
                }
            }
        }

        match self.bucket.total_bytes().await {
            Ok(total) => {
                let mut cache = self.cache.lock().expect("quota cache poisoned");
                cache.used_bytes = Some(total);
                cache.refreshed_at = Some(Instant::now());
                Some(total)
            }
            Err(e) => {
                warn!("bucket enumeration failed for quota: {e}");
                let cache = self.cache.lock().expect("quota cache poisoned");
                cache.used_bytes
            }
        }
    }

    /// Used ratio in [0, 1]; `None` when no quota is configured or the
    /// first enumeration has not succeeded yet.
    pub async fn used_ratio(&self) -> Option<f64> {
        let quota = self.quota_bytes?;
        let used = self.used_bytes().await?;
        let ratio = (used as f64 / quota as f64).min(1.0);
        METRICS.set_bucket_used_ratio(ratio);
        Some(ratio)
    }
}
