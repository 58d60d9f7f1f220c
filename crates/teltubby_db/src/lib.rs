//! Persistent store for the teltubby archive service.
//!
//! One SQLite database holds the dedup index (content hash -> object key,
//! source unique id -> content hash), large-file job rows with their attempt
//! log, and short-lived auth secrets. A single-connection pool serializes all
//! writes; WAL keeps readers unblocked.

pub mod dedup;
pub mod error;
pub mod jobs;
mod schema;
pub mod secrets;

pub use dedup::DuplicateCheck;
pub use error::{DbError, Result};
pub use jobs::{JobAttempt, JobRow};

use std::collections::BTreeMap;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Handle to the archive store. Cheap to clone.
#[derive(Clone)]
pub struct ArchiveDb {
    pool: SqlitePool,
}

impl ArchiveDb {
    /// Open (creating if missing) the store at `path` and verify the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let url = format!("sqlite:{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Archive store opened at {path}");
        Ok(db)
    }

    /// In-memory store for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe for the health surface.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Reclaim space after deletions.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Delete everything and return per-table deletion counts.
    ///
    /// Destructive; gated by the bot's `/purge confirm` command.
    pub async fn purge_all(&self) -> Result<BTreeMap<String, i64>> {
        let tables = ["tg_map", "files", "job_attempts", "jobs", "auth_secrets"];
        let mut counts = BTreeMap::new();

        let mut tx = self.pool.begin().await?;
        for table in tables {
            let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
                .fetch_one(&mut *tx)
                .await?;
            let count: i64 = row.get("n");
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
            counts.insert(table.to_string(), count);
        }
        sqlx::query("DELETE FROM sqlite_sequence")
            .execute(&mut *tx)
            .await
            .ok();
        tx.commit().await?;

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_memory_and_ping() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.ping().await.unwrap();
        db.vacuum().await.unwrap();
    }

    #[tokio::test]
    async fn purge_counts_by_table() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.record("aa", "k1", 10, Some("image/jpeg"), Some("u1"))
            .await
            .unwrap();
        let counts = db.purge_all().await.unwrap();
        assert_eq!(counts["files"], 1);
        assert_eq!(counts["tg_map"], 1);
        assert_eq!(counts["jobs"], 0);

        // Everything gone afterwards.
        assert!(!db.check_by_unique("u1").await.unwrap().hit);
    }
}
