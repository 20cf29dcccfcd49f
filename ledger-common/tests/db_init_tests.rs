//! Database bootstrap on disk

use ledger_common::db::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_init_creates_parent_directories_and_file() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("deeper").join("ledger.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('emp','nob','upload_jobs')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_reopen_keeps_existing_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ledger.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        sqlx::query(
            "INSERT INTO nob (upload_id, numero_nob, data_atualizacao) VALUES (3, '2025NOB0001', '2025-01-01T00:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nob WHERE upload_id = 3")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
