//! Process-wide metrics registry.
//!
//! Lock-free atomics, scraped through `/metrics` in Prometheus exposition
//! format. Each process (bot, worker) exposes its own registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Global metrics instance.
pub static METRICS: Metrics = Metrics::new();

/// Histogram bucket upper bounds for processing time (seconds).
const PROCESSING_BUCKETS: [f64; 8] = [0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

pub struct Metrics {
    // Ingestion counters
    pub ingested_messages: AtomicU64,
    pub ingested_bytes: AtomicU64,
    pub dedup_hits: AtomicU64,
    pub skipped_items: AtomicU64,

    // Job counters
    pub jobs_created: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_retried: AtomicU64,

    // Bucket used ratio gauge (f64 bits)
    bucket_used_ratio_bits: AtomicU64,

    // Processing time histogram
    processing_bucket_counts: [AtomicU64; 8],
    processing_count: AtomicU64,
    processing_sum_micros: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            ingested_messages: ZERO,
            ingested_bytes: ZERO,
            dedup_hits: ZERO,
            skipped_items: ZERO,
            jobs_created: ZERO,
            jobs_completed: ZERO,
            jobs_failed: ZERO,
            jobs_retried: ZERO,
            bucket_used_ratio_bits: ZERO,
            processing_bucket_counts: [ZERO; 8],
            processing_count: ZERO,
            processing_sum_micros: ZERO,
        }
    }

    #[inline]
    pub fn inc_ingested_messages(&self) {
        self.ingested_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_ingested_bytes(&self, bytes: u64) {
        self.ingested_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dedup_hits(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_skipped_items(&self) {
        self.skipped_items.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_jobs_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the bucket used ratio gauge (0..1).
    pub fn set_bucket_used_ratio(&self, ratio: f64) {
        self.bucket_used_ratio_bits
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    pub fn bucket_used_ratio(&self) -> f64 {
        f64::from_bits(self.bucket_used_ratio_bits.load(Ordering::Relaxed))
    }

    /// Record one batch processing duration.
    pub fn observe_processing(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        for (i, bound) in PROCESSING_BUCKETS.iter().enumerate() {
            if secs <= *bound {
                self.processing_bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.processing_count.fetch_add(1, Ordering::Relaxed);
        self.processing_sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingested_messages: self.ingested_messages.load(Ordering::Relaxed),
            ingested_bytes: self.ingested_bytes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            skipped_items: self.skipped_items.load(Ordering::Relaxed),
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            bucket_used_ratio: self.bucket_used_ratio(),
            processing_buckets: {
                let mut counts = [0u64; 8];
                for (i, c) in self.processing_bucket_counts.iter().enumerate() {
                    counts[i] = c.load(Ordering::Relaxed);
                }
                counts
            },
            processing_count: self.processing_count.load(Ordering::Relaxed),
            processing_sum_micros: self.processing_sum_micros.load(Ordering::Relaxed),
        }
    }

    /// Format as Prometheus exposition format.
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(2048);

        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP teltubby_{name} {help}\n# TYPE teltubby_{name} counter\nteltubby_{name} {value}\n\n"
            ));
        };
        counter(
            "ingested_messages_total",
            "Total number of messages ingested",
            s.ingested_messages,
        );
        counter(
            "ingested_bytes_total",
            "Total bytes uploaded to the object store",
            s.ingested_bytes,
        );
        counter("dedup_hits_total", "Total number of dedup hits", s.dedup_hits);
        counter(
            "skipped_items_total",
            "Total number of skipped items",
            s.skipped_items,
        );
        counter(
            "jobs_created_total",
            "Jobs created and enqueued for the large-file worker",
            s.jobs_created,
        );
        counter(
            "jobs_completed_total",
            "Jobs completed successfully by the worker",
            s.jobs_completed,
        );
        counter("jobs_failed_total", "Jobs failed in the worker", s.jobs_failed);
        counter(
            "jobs_retried_total",
            "Jobs re-queued by admin retry",
            s.jobs_retried,
        );

        out.push_str(&format!(
            "# HELP teltubby_bucket_used_ratio Bucket used ratio (0..1)\n# TYPE teltubby_bucket_used_ratio gauge\nteltubby_bucket_used_ratio {}\n\n",
            s.bucket_used_ratio
        ));

        out.push_str(
            "# HELP teltubby_processing_seconds Processing time per batch\n# TYPE teltubby_processing_seconds histogram\n",
        );
        for (i, bound) in PROCESSING_BUCKETS.iter().enumerate() {
            out.push_str(&format!(
                "teltubby_processing_seconds_bucket{{le=\"{bound}\"}} {}\n",
                s.processing_buckets[i]
            ));
        }
        out.push_str(&format!(
            "teltubby_processing_seconds_bucket{{le=\"+Inf\"}} {}\n",
            s.processing_count
        ));
        out.push_str(&format!(
            "teltubby_processing_seconds_sum {}\n",
            s.processing_sum_micros as f64 / 1_000_000.0
        ));
        out.push_str(&format!(
            "teltubby_processing_seconds_count {}\n",
            s.processing_count
        ));

        out
    }
}

/// Immutable snapshot for reading.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub ingested_messages: u64,
    pub ingested_bytes: u64,
    pub dedup_hits: u64,
    pub skipped_items: u64,
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub bucket_used_ratio: f64,
    pub processing_buckets: [u64; 8],
    pub processing_count: u64,
    pub processing_sum_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new();
        metrics.inc_ingested_messages();
        metrics.inc_ingested_messages();
        metrics.add_ingested_bytes(1024);
        metrics.inc_dedup_hits();

        let s = metrics.snapshot();
        assert_eq!(s.ingested_messages, 2);
        assert_eq!(s.ingested_bytes, 1024);
        assert_eq!(s.dedup_hits, 1);
    }

    #[test]
    fn test_gauge_roundtrip() {
        let metrics = Metrics::new();
        metrics.set_bucket_used_ratio(0.75);
        assert_eq!(metrics.bucket_used_ratio(), 0.75);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.observe_processing(Duration::from_millis(50));
        metrics.observe_processing(Duration::from_secs(2));

        let s = metrics.snapshot();
        assert_eq!(s.processing_count, 2);
        // 50ms lands in every bucket, 2s only from the 2.5s bucket up.
        assert_eq!(s.processing_buckets[0], 1);
        assert_eq!(s.processing_buckets[3], 2);
        assert_eq!(s.processing_buckets[7], 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.inc_jobs_completed();
        let output = metrics.prometheus_format();
        assert!(output.contains("teltubby_jobs_completed_total 1"));
        assert!(output.contains("teltubby_processing_seconds_bucket{le=\"+Inf\"} 0"));
        assert!(output.contains("# TYPE teltubby_bucket_used_ratio gauge"));
    }
}
