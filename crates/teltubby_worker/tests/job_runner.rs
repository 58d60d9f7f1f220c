//! Job execution protocol against in-memory collaborators (simulate mode).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use teltubby_db::ArchiveDb;
use teltubby_protocol::{
    now_iso, JobFileInfo, JobMessage, JobMetadata, JobState, JobTelegramContext,
};
use teltubby_storage::{ObjectSink, StorageError};
use teltubby_worker::{JobRunner, Notifier, StatusFile, TransportState, WorkerState};

#[derive(Default)]
struct MemorySink {
    objects: Mutex<HashMap<String, u64>>,
    fail: bool,
}

#[async_trait]
impl ObjectSink for MemorySink {
    fn bucket(&self) -> &str {
        "archive"
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::Config("injected failure".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.len() as u64);
        Ok(())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _length: u64,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::Config("injected failure".to_string()));
        }
        let size = std::fs::metadata(path)?.len();
        self.objects.lock().unwrap().insert(key.to_string(), size);
        Ok(())
    }
}

fn job(job_id: &str, file_name: Option<&str>, size: Option<u64>) -> JobMessage {
    JobMessage {
        job_id: job_id.to_string(),
        user_id: 1,
        chat_id: 7,
        message_id: 99,
        file_info: JobFileInfo {
            file_id: "fid".to_string(),
            file_unique_id: "uid-1".to_string(),
            file_size: size,
            file_type: "video".to_string(),
            file_name: file_name.map(|n| n.to_string()),
            mime_type: Some("video/mp4".to_string()),
        },
        telegram_context: JobTelegramContext {
            forward_origin: None,
            caption: None,
            entities: vec![],
            media_group_id: None,
        },
        job_metadata: JobMetadata {
            created_at: now_iso(),
            priority: 4,
            retry_count: 0,
            max_retries: 3,
        },
        unknown: Default::default(),
    }
}

async fn runner(sink: Arc<MemorySink>, db: ArchiveDb, dir: &Path) -> JobRunner {
    JobRunner {
        db,
        sink,
        transport: Arc::new(tokio::sync::Mutex::new(TransportState::simulate_only())),
        notifier: Notifier::disabled(),
        status: StatusFile::new(dir.join("worker_status.json")),
        io_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn simulate_job_completes_with_mtproto_key() {
    let dir = tempfile::tempdir().unwrap();
    let db = ArchiveDb::open_memory().await.unwrap();
    let sink = Arc::new(MemorySink::default());
    let runner = runner(sink.clone(), db.clone(), dir.path()).await;

    let job = job("j-1", Some("movie.mp4"), Some(4096));
    db.upsert_job("j-1", 1, 7, 99, JobState::Pending, 4, &now_iso(), None)
        .await
        .unwrap();

    runner.handle(&job).await;

    let row = db.get_job("j-1").await.unwrap().unwrap();
    assert_eq!(row.state, JobState::Completed);
    assert!(row.last_error.is_none());

    let objects = sink.objects.lock().unwrap();
    assert_eq!(objects.len(), 1);
    let (key, size) = objects.iter().next().unwrap();
    assert!(key.starts_with("teltubby/"));
    assert!(key.contains("/mtproto/99/"));
    assert!(key.ends_with("movie.mp4"));
    assert_eq!(*size, 4096);
    drop(objects);

    let attempts = db.list_attempts("j-1").await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].success, Some(true));

    // Status file picked up the completion.
    let status = StatusFile::read(&dir.path().join("worker_status.json")).unwrap();
    assert_eq!(status.jobs_completed, 1);
    assert_eq!(status.state, WorkerState::Healthy);
}

#[tokio::test]
async fn unnamed_file_falls_back_to_unique_id() {
    let dir = tempfile::tempdir().unwrap();
    let db = ArchiveDb::open_memory().await.unwrap();
    let sink = Arc::new(MemorySink::default());
    let runner = runner(sink.clone(), db.clone(), dir.path()).await;

    db.upsert_job("j-2", 1, 7, 99, JobState::Pending, 4, &now_iso(), None)
        .await
        .unwrap();
    runner.handle(&job("j-2", None, Some(100))).await;

    let objects = sink.objects.lock().unwrap();
    assert!(objects.keys().next().unwrap().ends_with("uid-1.bin"));
}

#[tokio::test]
async fn upload_failure_marks_job_failed_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = ArchiveDb::open_memory().await.unwrap();
    let sink = Arc::new(MemorySink {
        fail: true,
        ..Default::default()
    });
    let runner = runner(sink, db.clone(), dir.path()).await;

    db.upsert_job("j-3", 1, 7, 99, JobState::Pending, 4, &now_iso(), None)
        .await
        .unwrap();
    runner.handle(&job("j-3", Some("big.bin"), Some(100))).await;

    let row = db.get_job("j-3").await.unwrap().unwrap();
    assert_eq!(row.state, JobState::Failed);
    assert!(row.last_error.as_deref().unwrap().contains("injected failure"));

    let attempts = db.list_attempts("j-3").await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].success, Some(false));
}

#[tokio::test]
async fn cancelled_job_is_dropped_without_processing() {
    let dir = tempfile::tempdir().unwrap();
    let db = ArchiveDb::open_memory().await.unwrap();
    let sink = Arc::new(MemorySink::default());
    let runner = runner(sink.clone(), db.clone(), dir.path()).await;

    db.upsert_job("j-4", 1, 7, 99, JobState::Cancelled, 4, &now_iso(), None)
        .await
        .unwrap();
    runner.handle(&job("j-4", None, Some(100))).await;

    let row = db.get_job("j-4").await.unwrap().unwrap();
    assert_eq!(row.state, JobState::Cancelled);
    assert!(sink.objects.lock().unwrap().is_empty());
    assert!(db.list_attempts("j-4").await.unwrap().is_empty());
}

#[tokio::test]
async fn second_delivery_gets_a_higher_attempt_number() {
    let dir = tempfile::tempdir().unwrap();
    let db = ArchiveDb::open_memory().await.unwrap();
    let sink = Arc::new(MemorySink::default());
    let runner = runner(sink, db.clone(), dir.path()).await;

    db.upsert_job("j-5", 1, 7, 99, JobState::Pending, 4, &now_iso(), None)
        .await
        .unwrap();
    let message = job("j-5", Some("a.bin"), Some(10));
    runner.handle(&message).await;

    // Admin retry re-publishes; the redelivery logs attempt 2.
    db.update_job_state("j-5", JobState::Pending, None, &now_iso())
        .await
        .unwrap();
    runner.handle(&message).await;

    let attempts = db.list_attempts("j-5").await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].attempt, 2);
}
