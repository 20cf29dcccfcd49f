//! Upload job status store
//!
//! The pipeline needs two things from it: the cancellation flag of a job and
//! a place to report progress. `SqliteJobStatus` keeps both in the
//! `upload_jobs` table so another process (the CLI `cancel` command, a web
//! front end) can request cancellation and watch progress.

use crate::models::{RecordType, UploadState};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use ledger_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Job-status collaborator of the persistence pipeline
///
/// Failures are reported back but the pipeline treats them as non-fatal.
#[async_trait]
pub trait JobStatus: Send + Sync {
    /// Whether cancellation was requested for the job
    async fn read_cancel_flag(&self, record_type: RecordType, job_id: i64) -> Result<bool>;

    /// Store progress (0-100) and a human-readable message
    async fn update_status(
        &self,
        record_type: RecordType,
        job_id: i64,
        progress: u8,
        message: &str,
    ) -> Result<()>;

    /// Store the run state; stores without a state column ignore it
    async fn mark_state(
        &self,
        _record_type: RecordType,
        _job_id: i64,
        _state: UploadState,
    ) -> Result<()> {
        Ok(())
    }
}

/// Persisted job row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub record_type: String,
    pub job_id: i64,
    pub state: String,
    pub progress: i64,
    pub message: String,
    pub cancel_requested: bool,
    pub user_email: Option<String>,
    pub updated_at: String,
}

/// Job status backed by the `upload_jobs` table
#[derive(Clone)]
pub struct SqliteJobStatus {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteJobStatus {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Create or reset the job row for a new run
    pub async fn register_job(
        &self,
        record_type: RecordType,
        job_id: i64,
        user_email: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_jobs (record_type, job_id, state, progress, message, cancel_requested, user_email)
            VALUES (?, ?, 'STARTED', 0, '', 0, ?)
            ON CONFLICT(record_type, job_id) DO UPDATE SET
                state = 'STARTED',
                progress = 0,
                message = '',
                cancel_requested = 0,
                user_email = excluded.user_email,
                updated_at = datetime('now')
            "#,
        )
        .bind(record_type.as_str())
        .bind(job_id)
        .bind(user_email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the cancellation flag; false when the job does not exist
    pub async fn request_cancel(&self, record_type: RecordType, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_jobs SET cancel_requested = 1, updated_at = datetime('now') WHERE record_type = ? AND job_id = ?",
        )
        .bind(record_type.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_job(&self, record_type: RecordType, job_id: i64) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record_type, job_id, state, progress, message, cancel_requested, user_email, updated_at
            FROM upload_jobs
            WHERE record_type = ? AND job_id = ?
            "#,
        )
        .bind(record_type.as_str())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| JobRecord {
            record_type: row.get("record_type"),
            job_id: row.get("job_id"),
            state: row.get("state"),
            progress: row.get("progress"),
            message: row.get("message"),
            cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
            user_email: row.get("user_email"),
            updated_at: row.get("updated_at"),
        }))
    }
}

#[async_trait]
impl JobStatus for SqliteJobStatus {
    async fn read_cancel_flag(&self, record_type: RecordType, job_id: i64) -> Result<bool> {
        let flag: Option<i64> = sqlx::query_scalar(
            "SELECT cancel_requested FROM upload_jobs WHERE record_type = ? AND job_id = ?",
        )
        .bind(record_type.as_str())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(flag.unwrap_or(0) != 0)
    }

    async fn update_status(
        &self,
        record_type: RecordType,
        job_id: i64,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        retry_on_lock("update_status", self.max_lock_wait_ms, || async {
            sqlx::query(
                "UPDATE upload_jobs SET progress = ?, message = ?, updated_at = datetime('now') WHERE record_type = ? AND job_id = ?",
            )
            .bind(i64::from(progress))
            .bind(message)
            .bind(record_type.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(ledger_common::Error::Database)?;
            Ok(())
        })
        .await
    }

    async fn mark_state(&self, record_type: RecordType, job_id: i64, state: UploadState) -> Result<()> {
        retry_on_lock("mark_state", self.max_lock_wait_ms, || async {
            sqlx::query(
                "UPDATE upload_jobs SET state = ?, updated_at = datetime('now') WHERE record_type = ? AND job_id = ?",
            )
            .bind(state.label())
            .bind(record_type.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(ledger_common::Error::Database)?;
            Ok(())
        })
        .await
    }
}
