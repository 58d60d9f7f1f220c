//! Short-lived auth secrets for interactive MTProto login.
//!
//! Recognized keys are `code` (single-use, consumed by the worker) and
//! `password` (persists until replaced).

use sqlx::Row;

use crate::error::Result;
use crate::ArchiveDb;

impl ArchiveDb {
    /// Store or replace a secret value.
    pub async fn set_secret(&self, key: &str, value: &str, now_iso: &str) -> Result<()> {
        sqlx::query("REPLACE INTO auth_secrets(key, value, created_at) VALUES(?,?,?)")
            .bind(key)
            .bind(value)
            .bind(now_iso)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Return `(value, created_at)` if the secret exists and is no older
    /// than `min_ts_iso`. ISO timestamps compare lexicographically.
    pub async fn get_secret_since(
        &self,
        key: &str,
        min_ts_iso: &str,
    ) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            "SELECT value, created_at FROM auth_secrets WHERE key = ? AND created_at >= ?",
        )
        .bind(key)
        .bind(min_ts_iso)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| (r.get("value"), r.get("created_at"))))
    }

    /// Delete a secret entry by key.
    pub async fn delete_secret(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_secrets WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn freshness_window_filters_stale_secrets() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.set_secret("code", "123456", "2024-01-01T00:00:00Z")
            .await
            .unwrap();

        // Fresh enough.
        let got = db
            .get_secret_since("code", "2024-01-01T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(got, Some(("123456".to_string(), "2024-01-01T00:00:00Z".to_string())));

        // Too old for a later window.
        let got = db
            .get_secret_since("code", "2024-01-01T00:10:00Z")
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn replace_and_delete() {
        let db = ArchiveDb::open_memory().await.unwrap();
        db.set_secret("password", "old", "2024-01-01T00:00:00Z")
            .await
            .unwrap();
        db.set_secret("password", "new", "2024-01-01T00:01:00Z")
            .await
            .unwrap();

        let got = db
            .get_secret_since("password", "2024-01-01T00:00:30Z")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.0, "new");

        // Consuming a code deletes it; a second read misses.
        db.set_secret("code", "42", "2024-01-01T00:02:00Z").await.unwrap();
        db.delete_secret("code").await.unwrap();
        assert!(db
            .get_secret_since("code", "2024-01-01T00:00:00Z")
            .await
            .unwrap()
            .is_none());
    }
}
