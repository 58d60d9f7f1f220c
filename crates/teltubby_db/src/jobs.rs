//! Large-file job rows and the append-only attempt log.

use sqlx::Row;

use crate::error::{DbError, Result};
use crate::ArchiveDb;
use teltubby_protocol::JobState;

/// One row of the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub state: JobState,
    pub priority: u8,
    pub created_at: String,
    pub updated_at: String,
    pub last_error: Option<String>,
    pub payload_json: Option<String>,
}

/// One row of the `job_attempts` log.
#[derive(Debug, Clone)]
pub struct JobAttempt {
    pub id: i64,
    pub job_id: String,
    pub attempt: i64,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

impl ArchiveDb {
    /// Insert or update a job row.
    ///
    /// State, priority and updated_at overwrite; the payload is preserved
    /// when the caller passes none (retry paths re-publish the stored one).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_job(
        &self,
        job_id: &str,
        user_id: i64,
        chat_id: i64,
        message_id: i64,
        state: JobState,
        priority: u8,
        now_iso: &str,
        payload_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs(job_id, user_id, chat_id, message_id, state, priority,
                             created_at, updated_at, payload_json)
            VALUES(?,?,?,?,?,?,?,?,?)
            ON CONFLICT(job_id) DO UPDATE SET
                state = excluded.state,
                priority = excluded.priority,
                updated_at = excluded.updated_at,
                payload_json = COALESCE(excluded.payload_json, jobs.payload_json)
            "#,
        )
        .bind(job_id)
        .bind(user_id)
        .bind(chat_id)
        .bind(message_id)
        .bind(state.as_str())
        .bind(priority as i64)
        .bind(now_iso)
        .bind(now_iso)
        .bind(payload_json)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update the job state and optional last error.
    pub async fn update_job_state(
        &self,
        job_id: &str,
        state: JobState,
        last_error: Option<&str>,
        now_iso: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE jobs SET state = ?, last_error = ?, updated_at = ? WHERE job_id = ?")
            .bind(state.as_str())
            .bind(last_error)
            .bind(now_iso)
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Fetch a job row by id.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query(
            "SELECT job_id, user_id, chat_id, message_id, state, priority, created_at, updated_at, last_error, payload_json FROM jobs WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// List recent jobs ordered by updated_at descending.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<JobRow>> {
        let rows = sqlx::query(
            "SELECT job_id, user_id, chat_id, message_id, state, priority, created_at, updated_at, last_error, payload_json FROM jobs ORDER BY updated_at DESC, job_id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Open a new attempt for a job and return the attempt row id.
    pub async fn begin_attempt(&self, job_id: &str, attempt: i64, now_iso: &str) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO job_attempts(job_id, attempt, started_at) VALUES(?,?,?)")
                .bind(job_id)
                .bind(attempt)
                .bind(now_iso)
                .execute(self.pool())
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Close an attempt with its outcome.
    pub async fn finish_attempt(
        &self,
        attempt_id: i64,
        now_iso: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE job_attempts SET finished_at = ?, success = ?, error = ? WHERE id = ?")
            .bind(now_iso)
            .bind(success as i64)
            .bind(error)
            .bind(attempt_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Attempt history for a job, oldest first.
    pub async fn list_attempts(&self, job_id: &str) -> Result<Vec<JobAttempt>> {
        let rows = sqlx::query(
            "SELECT id, job_id, attempt, started_at, finished_at, success, error FROM job_attempts WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| JobAttempt {
                id: row.get("id"),
                job_id: row.get("job_id"),
                attempt: row.get("attempt"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                success: row.get::<Option<i64>, _>("success").map(|v| v != 0),
                error: row.get("error"),
            })
            .collect())
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<JobRow> {
    let state_raw: String = row.get("state");
    let state = JobState::parse(&state_raw)
        .ok_or_else(|| DbError::invalid_state(format!("unknown job state: {state_raw}")))?;

    Ok(JobRow {
        job_id: row.get("job_id"),
        user_id: row.get("user_id"),
        chat_id: row.get("chat_id"),
        message_id: row.get("message_id"),
        state,
        priority: row.get::<i64, _>("priority") as u8,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_error: row.get("last_error"),
        payload_json: row.get("payload_json"),
    })
}
