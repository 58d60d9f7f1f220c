//! Worker status file.
//!
//! The worker maintains a small JSON file describing its state; the bot's
//! `/mtstatus` command and the health surface read it. This is the status
//! channel between the two processes - no container-runtime introspection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::now_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Authenticating,
    Healthy,
    Simulate,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Authenticating => "authenticating",
            WorkerState::Healthy => "healthy",
            WorkerState::Simulate => "simulate",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub authorized: bool,
    pub last_activity: Option<String>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub updated_at: String,
}

impl WorkerStatus {
    pub fn starting() -> Self {
        Self {
            state: WorkerState::Starting,
            authorized: false,
            last_activity: None,
            jobs_completed: 0,
            jobs_failed: 0,
            updated_at: now_iso(),
        }
    }
}

/// Writer/reader for the status file. Writes are atomic (temp + rename).
#[derive(Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last written status.
    pub fn read_current(&self) -> Option<WorkerStatus> {
        Self::read(&self.path)
    }

    pub fn write(&self, status: &WorkerStatus) {
        let mut status = status.clone();
        status.updated_at = now_iso();
        let Ok(body) = serde_json::to_vec_pretty(&status) else {
            return;
        };
        let tmp = self.path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, &body).and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            warn!("failed to write worker status {}: {e}", self.path.display());
        }
    }

    pub fn read(path: &Path) -> Option<WorkerStatus> {
        let body = std::fs::read(path).ok()?;
        serde_json::from_slice(&body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_status.json");
        let file = StatusFile::new(&path);

        let mut status = WorkerStatus::starting();
        status.state = WorkerState::Healthy;
        status.authorized = true;
        status.jobs_completed = 3;
        file.write(&status);

        let read = StatusFile::read(&path).unwrap();
        assert_eq!(read.state, WorkerState::Healthy);
        assert!(read.authorized);
        assert_eq!(read.jobs_completed, 3);
        assert!(!read.updated_at.is_empty());
    }

    #[test]
    fn read_missing_file_is_none() {
        assert!(StatusFile::read(Path::new("/nonexistent/status.json")).is_none());
    }
}
