//! Batch persistence pipeline
//!
//! Commits a reconciled batch as the new active generation of its record
//! type:
//! STARTED → DEACTIVATING → INSERTING (chunk i of N) → COMPLETED,
//! with CANCELLED and FAILED terminal.
//!
//! Chunks are strictly sequential. Cancellation is polled before every chunk
//! and never undoes committed chunks; a re-run deactivates everything again
//! and starts a fresh generation. The upload id doubles as the job id of the
//! job-status collaborator.

use crate::db::jobs::JobStatus;
use crate::db::ledger_rows::{deactivate_active_rows, insert_row, insert_sql, LedgerRow};
use crate::error::{IngestError, IngestResult};
use crate::models::{GenerationSummary, RecordType, UploadContext, UploadRun, UploadState};
use crate::utils::pool_monitor::{begin_monitored, begin_monitored_on};
use ledger_common::config::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pipeline construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per insert transaction
    pub chunk_size: usize,
    /// Relax durability pragmas on the connections that write chunks
    pub fast_insert: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fast_insert: true,
        }
    }
}

/// How a run ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every chunk committed
    Completed(GenerationSummary),
    /// Stopped at a chunk boundary; committed chunks stay active
    Cancelled {
        rows_committed: usize,
        chunks_committed: usize,
    },
}

impl RunOutcome {
    pub fn rows_committed(&self) -> usize {
        match self {
            RunOutcome::Completed(summary) => summary.rows_written,
            RunOutcome::Cancelled { rows_committed, .. } => *rows_committed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled { .. })
    }
}

/// Writes generations of ledger rows
pub struct PersistencePipeline {
    pool: SqlitePool,
    job_status: Arc<dyn JobStatus>,
    chunk_size: usize,
    fast_insert: bool,
}

impl PersistencePipeline {
    /// Build the pipeline; `config` is read here once and fixed afterwards
    pub fn new(pool: SqlitePool, job_status: Arc<dyn JobStatus>, config: PipelineConfig) -> Self {
        if config.chunk_size == 0 {
            warn!("Chunk size 0 is invalid; using 1");
        }
        let chunk_size = config.chunk_size.max(1);
        info!(chunk_size, fast_insert = config.fast_insert, "Persistence pipeline initialized");

        Self {
            pool,
            job_status,
            chunk_size,
            fast_insert: config.fast_insert,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Deactivate the previous generation and insert `rows` chunk by chunk
    ///
    /// Returns `RunOutcome::Cancelled` when `cancel` fires or the job's
    /// cancel flag is set before a chunk starts. Fails with
    /// `IngestError::Deactivation` before any insert, or with
    /// `IngestError::Persistence` for the chunk that could not be written
    /// (that chunk is rolled back, earlier ones stay committed).
    pub async fn persist<T: LedgerRow>(
        &self,
        context: &UploadContext,
        rows: &[T],
        cancel: &CancellationToken,
    ) -> IngestResult<RunOutcome> {
        let record_type = T::RECORD_TYPE;
        let job_id = context.upload_id;
        let total = rows.len();
        let mut run = UploadRun::new(record_type, job_id, total);

        info!(
            run_id = %run.run_id,
            record_type = %record_type,
            upload_id = job_id,
            total,
            chunk_size = self.chunk_size,
            "Starting generation"
        );

        self.transition(&mut run, UploadState::Deactivating).await;
        self.report(&run, "Deactivating previous generation.").await;
        match self.deactivate(record_type).await {
            Ok(deactivated) => info!(record_type = %record_type, deactivated, "Previous generation deactivated"),
            Err(e) => {
                error!(record_type = %record_type, error = %e, "Deactivation failed; nothing written");
                self.transition(&mut run, UploadState::Failed).await;
                return Err(IngestError::Deactivation(e));
            }
        }

        let sql = insert_sql::<T>();
        let total_chunks = total.div_ceil(self.chunk_size);
        let mut chunk_sizes = Vec::with_capacity(total_chunks);

        for (index, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let chunk_number = index + 1;
            self.transition(
                &mut run,
                UploadState::Inserting {
                    chunk: chunk_number,
                    total_chunks,
                },
            )
            .await;

            if self.cancel_requested(record_type, job_id, cancel).await {
                info!(
                    record_type = %record_type,
                    upload_id = job_id,
                    chunk = chunk_number,
                    inserted = run.inserted,
                    total,
                    "Cancellation requested; stopping before chunk"
                );
                self.transition(&mut run, UploadState::Cancelled).await;
                return Ok(RunOutcome::Cancelled {
                    rows_committed: run.inserted,
                    chunks_committed: chunk_sizes.len(),
                });
            }

            if let Err(source) = self.insert_chunk(&sql, chunk, context).await {
                error!(
                    record_type = %record_type,
                    upload_id = job_id,
                    chunk = chunk_number,
                    error = %source,
                    "Chunk insert failed; chunk rolled back"
                );
                self.transition(&mut run, UploadState::Failed).await;
                return Err(IngestError::Persistence {
                    chunk: chunk_number,
                    source,
                });
            }

            chunk_sizes.push(chunk.len());
            let progress = run.record_inserted(chunk.len());
            self.report(&run, &run.progress_message()).await;
            info!(
                record_type = %record_type,
                chunk = chunk_number,
                total_chunks,
                inserted = run.inserted,
                total,
                progress,
                "Chunk committed"
            );
        }

        if total == 0 {
            run.finish();
            self.report(&run, &run.progress_message()).await;
        }
        self.transition(&mut run, UploadState::Completed).await;

        info!(
            run_id = %run.run_id,
            record_type = %record_type,
            upload_id = job_id,
            rows_written = run.inserted,
            "Generation completed"
        );

        Ok(RunOutcome::Completed(GenerationSummary {
            record_type,
            table: record_type.table_name().to_string(),
            upload_id: job_id,
            rows_written: run.inserted,
            chunk_sizes,
        }))
    }

    /// Mark the active generation inactive in one transaction
    async fn deactivate(&self, record_type: RecordType) -> sqlx::Result<u64> {
        let mut tx = begin_monitored(&self.pool, "persistence_pipeline::deactivate").await?;
        let deactivated = deactivate_active_rows(tx.conn(), record_type).await?;
        tx.commit().await?;
        Ok(deactivated)
    }

    /// Insert one chunk in its own transaction; rolled back on the first failing row
    ///
    /// With `fast_insert` the relaxed pragmas last only for this chunk: the
    /// connection's previous values are restored before it returns to the pool.
    async fn insert_chunk<T: LedgerRow>(
        &self,
        sql: &str,
        chunk: &[T],
        context: &UploadContext,
    ) -> sqlx::Result<()> {
        let mut conn = self.pool.acquire().await?;
        let saved = if self.fast_insert {
            Some(apply_fast_insert_pragmas(&mut conn).await?)
        } else {
            None
        };

        let result = write_chunk(&mut conn, sql, chunk, context).await;

        if let Some(saved) = saved {
            if let Err(e) = saved.restore(&mut conn).await {
                warn!(error = %e, "Could not restore connection pragmas");
            }
        }
        result
    }

    async fn cancel_requested(
        &self,
        record_type: RecordType,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        match self.job_status.read_cancel_flag(record_type, job_id).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(record_type = %record_type, job_id, error = %e, "Could not read cancel flag");
                false
            }
        }
    }

    async fn report(&self, run: &UploadRun, message: &str) {
        if let Err(e) = self
            .job_status
            .update_status(run.record_type, run.upload_id, run.progress, message)
            .await
        {
            warn!(record_type = %run.record_type, job_id = run.upload_id, error = %e, "Could not update job status");
        }
    }

    async fn transition(&self, run: &mut UploadRun, state: UploadState) {
        run.transition_to(state);
        if let Err(e) = self
            .job_status
            .mark_state(run.record_type, run.upload_id, state)
            .await
        {
            warn!(record_type = %run.record_type, job_id = run.upload_id, error = %e, "Could not store job state");
        }
    }
}

async fn write_chunk<T: LedgerRow>(
    conn: &mut SqliteConnection,
    sql: &str,
    chunk: &[T],
    context: &UploadContext,
) -> sqlx::Result<()> {
    let mut tx = begin_monitored_on(conn, "persistence_pipeline::insert_chunk").await?;
    let written_at = ledger_common::time::now_naive();
    for row in chunk {
        if let Err(e) = insert_row(tx.conn(), sql, row, context, written_at).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Chunk rollback failed");
            }
            return Err(e);
        }
    }
    tx.commit().await
}

/// Connection pragma values in effect before a fast insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SavedPragmas {
    synchronous: i64,
    temp_store: i64,
}

impl SavedPragmas {
    async fn read(conn: &mut SqliteConnection) -> sqlx::Result<Self> {
        Ok(Self {
            synchronous: sqlx::query_scalar("PRAGMA synchronous")
                .fetch_one(&mut *conn)
                .await?,
            temp_store: sqlx::query_scalar("PRAGMA temp_store")
                .fetch_one(&mut *conn)
                .await?,
        })
    }

    /// Pragmas cannot take bound parameters; both values come from SQLite itself
    async fn restore(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(&format!("PRAGMA synchronous = {}", self.synchronous))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("PRAGMA temp_store = {}", self.temp_store))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Relax durability on `conn`, returning the values to restore afterwards
async fn apply_fast_insert_pragmas(conn: &mut SqliteConnection) -> sqlx::Result<SavedPragmas> {
    let saved = SavedPragmas::read(conn).await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ledger_rows::{count_active_rows, PaymentOrderRow};
    use async_trait::async_trait;
    use ledger_common::db::init_memory_database;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStatus {
        progress: Mutex<Vec<u8>>,
        states: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl JobStatus for RecordingStatus {
        async fn read_cancel_flag(&self, _: RecordType, _: i64) -> ledger_common::Result<bool> {
            Ok(false)
        }

        async fn update_status(
            &self,
            _: RecordType,
            _: i64,
            progress: u8,
            _: &str,
        ) -> ledger_common::Result<()> {
            self.progress.lock().unwrap().push(progress);
            Ok(())
        }

        async fn mark_state(&self, _: RecordType, _: i64, state: UploadState) -> ledger_common::Result<()> {
            self.states.lock().unwrap().push(state.label());
            Ok(())
        }
    }

    fn context() -> UploadContext {
        UploadContext {
            upload_id: 3,
            user_email: "ops@example.org".to_string(),
            file_timestamp: chrono::NaiveDate::from_ymd_opt(2025, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn rows(n: usize) -> Vec<PaymentOrderRow> {
        (0..n)
            .map(|i| PaymentOrderRow {
                numero_nob: Some(format!("2025OB{:05}", i)),
                raw_payload: "{}".to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_states_of_a_small_run() {
        let pool = init_memory_database().await.unwrap();
        let status = Arc::new(RecordingStatus::default());
        let pipeline = PersistencePipeline::new(
            pool.clone(),
            status.clone(),
            PipelineConfig { chunk_size: 2, fast_insert: true },
        );

        let outcome = pipeline
            .persist(&context(), &rows(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.rows_committed(), 3);
        assert_eq!(
            *status.states.lock().unwrap(),
            vec!["DEACTIVATING", "INSERTING", "INSERTING", "COMPLETED"]
        );
        assert_eq!(*status.progress.lock().unwrap(), vec![0, 66, 100]);
        assert_eq!(count_active_rows(&pool, RecordType::PaymentOrder).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_chunk() {
        let pool = init_memory_database().await.unwrap();
        let pipeline = PersistencePipeline::new(
            pool.clone(),
            Arc::new(RecordingStatus::default()),
            PipelineConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        let outcome = pipeline.persist(&context(), &rows(5), &token).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Cancelled {
                rows_committed: 0,
                chunks_committed: 0
            }
        );
        assert_eq!(count_active_rows(&pool, RecordType::PaymentOrder).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_generation_completes_at_100() {
        let pool = init_memory_database().await.unwrap();
        let status = Arc::new(RecordingStatus::default());
        let pipeline = PersistencePipeline::new(pool, status.clone(), PipelineConfig::default());

        let outcome = pipeline
            .persist::<PaymentOrderRow>(&context(), &[], &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            RunOutcome::Completed(summary) => {
                assert_eq!(summary.rows_written, 0);
                assert!(summary.chunk_sizes.is_empty());
                assert_eq!(summary.table, "nob");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(status.progress.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_clamped() {
        let pool = init_memory_database().await.unwrap();
        let pipeline = PersistencePipeline::new(
            pool,
            Arc::new(RecordingStatus::default()),
            PipelineConfig { chunk_size: 0, fast_insert: false },
        );
        assert_eq!(pipeline.chunk_size(), 1);
    }

    #[tokio::test]
    async fn test_fast_insert_pragmas_do_not_outlive_the_chunk() {
        let pool = init_memory_database().await.unwrap();
        let before = SavedPragmas {
            synchronous: 2,
            temp_store: 1,
        };
        {
            let mut conn = pool.acquire().await.unwrap();
            before.restore(&mut conn).await.unwrap();

            let saved = apply_fast_insert_pragmas(&mut conn).await.unwrap();
            assert_eq!(saved, before);
            let relaxed = SavedPragmas::read(&mut conn).await.unwrap();
            assert_eq!(relaxed, SavedPragmas { synchronous: 1, temp_store: 2 });
            saved.restore(&mut conn).await.unwrap();
        }

        let pipeline = PersistencePipeline::new(
            pool.clone(),
            Arc::new(RecordingStatus::default()),
            PipelineConfig { chunk_size: 2, fast_insert: true },
        );
        pipeline
            .persist(&context(), &rows(5), &CancellationToken::new())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(SavedPragmas::read(&mut conn).await.unwrap(), before);
    }
}
