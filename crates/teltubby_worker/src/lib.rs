//! Large-file worker.
//!
//! Consumes jobs from the durable queue, acquires content over the MTProto
//! transport (or simulates when credentials are absent), uploads to the
//! bucket, walks the job row through its state machine, and notifies the
//! originating chat. A session monitor probes transport health and runs the
//! interactive re-authentication flow through the store.

pub mod mtproto;
pub mod notify;
pub mod recovery;
pub mod runner;
pub mod worker;

pub use notify::Notifier;
pub use runner::{JobRunner, TransportState};
pub use teltubby_protocol::{StatusFile, WorkerState, WorkerStatus};
pub use worker::Worker;
