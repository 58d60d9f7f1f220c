//! Dedup index operations (content hash and source unique id lookups).

use sqlx::Row;

use crate::error::Result;
use crate::ArchiveDb;
use teltubby_protocol::now_iso;

/// Outcome of a dedup probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub hit: bool,
    pub existing_key: Option<String>,
}

impl DuplicateCheck {
    fn miss() -> Self {
        Self {
            hit: false,
            existing_key: None,
        }
    }

    fn hit(key: String) -> Self {
        Self {
            hit: true,
            existing_key: Some(key),
        }
    }
}

impl ArchiveDb {
    /// Fast-path probe by the platform's stable file id.
    pub async fn check_by_unique(&self, file_unique_id: &str) -> Result<DuplicateCheck> {
        let row = sqlx::query(
            "SELECT f.s3_key FROM tg_map t JOIN files f ON f.sha256 = t.sha256 WHERE t.file_unique_id = ?",
        )
        .bind(file_unique_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(row) => DuplicateCheck::hit(row.get("s3_key")),
            None => DuplicateCheck::miss(),
        })
    }

    /// Content-hash probe after acquisition.
    pub async fn check_by_hash(&self, sha256: &str) -> Result<DuplicateCheck> {
        let row = sqlx::query("SELECT s3_key FROM files WHERE sha256 = ?")
            .bind(sha256)
            .fetch_optional(self.pool())
            .await?;

        Ok(match row {
            Some(row) => DuplicateCheck::hit(row.get("s3_key")),
            None => DuplicateCheck::miss(),
        })
    }

    /// Record an archived file and its optional source mapping.
    ///
    /// Idempotent: replayed inserts leave the first-written row in place.
    /// Both rows commit in one transaction so the mapping can never point at
    /// a missing file record.
    pub async fn record(
        &self,
        sha256: &str,
        s3_key: &str,
        size_bytes: u64,
        mime: Option<&str>,
        file_unique_id: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO files(sha256, s3_key, size_bytes, mime, created_at) VALUES(?,?,?,?,?)",
        )
        .bind(sha256)
        .bind(s3_key)
        .bind(size_bytes as i64)
        .bind(mime)
        .bind(now_iso())
        .execute(&mut *tx)
        .await?;

        if let Some(uid) = file_unique_id {
            sqlx::query("INSERT OR IGNORE INTO tg_map(file_unique_id, sha256) VALUES(?,?)")
                .bind(uid)
                .bind(sha256)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn misses_on_empty_store() {
        let db = ArchiveDb::open_memory().await.unwrap();
        assert!(!db.check_by_unique("u1").await.unwrap().hit);
        assert!(!db.check_by_hash("aa").await.unwrap().hit);
    }

    #[tokio::test]
    async fn dedup_is_transitive() {
        // If uid -> hash and hash -> key are recorded, the uid probe
        // resolves to the key.
        let db = ArchiveDb::open_memory().await.unwrap();
        db.record("aa", "teltubby/2024/01/c/1/x.jpg", 10, Some("image/jpeg"), Some("u1"))
            .await
            .unwrap();

        let by_uid = db.check_by_unique("u1").await.unwrap();
        assert!(by_uid.hit);
        assert_eq!(by_uid.existing_key.as_deref(), Some("teltubby/2024/01/c/1/x.jpg"));

        let by_hash = db.check_by_hash("aa").await.unwrap();
        assert_eq!(by_hash.existing_key, by_uid.existing_key);
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.record("aa", "key-one", 10, None, Some("u1")).await.unwrap();
        // Replay with a different key must not rewrite the file record.
        db.record("aa", "key-two", 10, None, Some("u1")).await.unwrap();

        let check = db.check_by_hash("aa").await.unwrap();
        assert_eq!(check.existing_key.as_deref(), Some("key-one"));
    }

    #[tokio::test]
    async fn two_uids_can_share_one_hash() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.record("aa", "key-one", 10, None, Some("u1")).await.unwrap();
        db.record("aa", "key-one", 10, None, Some("u2")).await.unwrap();

        assert!(db.check_by_unique("u1").await.unwrap().hit);
        assert!(db.check_by_unique("u2").await.unwrap().hit);
    }
}
