//! Database schema for the archive store.
//!
//! All CREATE TABLE statements live here - single source of truth. The
//! `messages` table is reserved for future use and is never written.

use crate::error::Result;
use crate::ArchiveDb;
use tracing::info;

impl ArchiveDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL keeps readers unblocked while the single writer commits.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(self.pool())
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(self.pool())
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(self.pool())
            .await?;

        self.create_dedup_tables().await?;
        self.create_job_tables().await?;
        self.create_secret_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Content-addressed dedup index.
    async fn create_dedup_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS files (
                sha256 TEXT PRIMARY KEY,
                s3_key TEXT NOT NULL,
                size_bytes INTEGER,
                mime TEXT,
                created_at TEXT
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tg_map (
                file_unique_id TEXT PRIMARY KEY,
                sha256 TEXT NOT NULL,
                FOREIGN KEY(sha256) REFERENCES files(sha256)
            )"#,
        )
        .execute(self.pool())
        .await?;

        // Reserved; the pipeline does not populate it.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT,
                chat_id TEXT,
                media_group_id TEXT,
                created_at TEXT,
                PRIMARY KEY(message_id, chat_id)
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at)")
            .execute(self.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tg_map_sha256 ON tg_map(sha256)")
            .execute(self.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(media_group_id)")
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Large-file job rows and their attempt log.
    async fn create_job_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 4,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_error TEXT,
                payload_json TEXT
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS job_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                success INTEGER,
                error TEXT,
                FOREIGN KEY(job_id) REFERENCES jobs(job_id)
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)")
            .execute(self.pool())
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_attempts_job ON job_attempts(job_id)")
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Short-lived secrets for interactive MTProto login.
    async fn create_secret_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS auth_secrets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
