//! Timed transactions for chunk writes
//!
//! Every chunk of a generation is written in its own transaction. The
//! wrapper logs how long the connection was awaited and held, so slow
//! chunks show up in the logs with the chunk that caused them.

use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::time::Instant;

/// Hold time above which a chunk transaction is reported
const SLOW_HOLD_MS: u128 = 2000;

/// Wait time above which connection acquisition is reported
const SLOW_ACQUIRE_MS: u128 = 1000;

/// Transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Connection of the open transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit and log hold time
    pub async fn commit(self) -> sqlx::Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.commit().await?;

        if held_ms > SLOW_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms as u64,
                "Long transaction; connection held for an extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms = held_ms as u64, "Transaction committed");
        }
        Ok(())
    }

    /// Roll back and log hold time
    pub async fn rollback(self) -> sqlx::Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        self.tx.rollback().await?;
        tracing::debug!(caller = self.caller, held_ms = held_ms as u64, "Transaction rolled back");
        Ok(())
    }
}

/// Begin a transaction on `pool`, logging slow acquisition
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> sqlx::Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;
    Ok(monitored(tx, caller, start))
}

/// Begin a transaction on an already acquired connection
///
/// Used when connection-level settings must be applied before `BEGIN`.
pub async fn begin_monitored_on<'c>(
    conn: &'c mut SqliteConnection,
    caller: &'static str,
) -> sqlx::Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = sqlx::Connection::begin(conn).await?;
    Ok(monitored(tx, caller, start))
}

fn monitored<'c>(
    tx: Transaction<'c, Sqlite>,
    caller: &'static str,
    start: Instant,
) -> MonitoredTransaction<'c> {
    let wait_ms = start.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(
            caller,
            wait_ms = wait_ms as u64,
            "Slow connection acquisition; pool may be saturated"
        );
    } else {
        tracing::debug!(caller, wait_ms = wait_ms as u64, "Connection acquired");
    }

    MonitoredTransaction {
        tx,
        caller,
        acquired_at: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::db::init_memory_database;

    #[tokio::test]
    async fn test_commit_persists() {
        let pool = init_memory_database().await.unwrap();
        let mut tx = begin_monitored(&pool, "test").await.unwrap();
        sqlx::query("INSERT INTO upload_jobs (record_type, job_id) VALUES ('emp', 1)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let pool = init_memory_database().await.unwrap();
        let mut tx = begin_monitored(&pool, "test").await.unwrap();
        sqlx::query("INSERT INTO upload_jobs (record_type, job_id) VALUES ('emp', 1)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_transaction_on_acquired_connection() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&mut *conn)
            .await
            .unwrap();

        let mut tx = begin_monitored_on(&mut conn, "test").await.unwrap();
        sqlx::query("INSERT INTO upload_jobs (record_type, job_id) VALUES ('nob', 2)")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        drop(conn);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_jobs WHERE record_type = 'nob'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
