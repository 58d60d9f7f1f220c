//! Ingestion: timed album aggregation and the per-batch pipeline.
//!
//! The aggregator coalesces messages sharing a media group id into batches;
//! the pipeline takes a ready batch through size gating, two-stage dedup,
//! acquire-and-hash, upload, store recording, and the JSON manifest.

pub mod album;
pub mod pipeline;
pub mod transport;

pub use album::{AddOutcome, AlbumAggregator};
pub use pipeline::{process_batch, BatchResult, ItemOutcome, PipelineConfig, PipelineError};
pub use transport::{
    write_and_hash, AcquiredFile, MediaTransport, ObjectSink, ProbeOutcome, TransportError,
};
