//! Database initialization
//!
//! Creates the SQLite database on first run and the tables every crate relies
//! on: one table per ledger record type (`emp`, `nob`) plus the upload job
//! status store. All statements are idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Generations are written by a single job at a time
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Limited to one connection: every pooled connection to `sqlite::memory:`
/// would otherwise open its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create every ledger table (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_emp_table(pool).await?;
    create_nob_table(pool).await?;
    create_upload_jobs_table(pool).await?;
    Ok(())
}

/// Commitment ledger rows, one generation per upload
async fn create_emp_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emp (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            upload_id INTEGER NOT NULL,
            chave TEXT,
            chave_planejamento TEXT,
            regiao TEXT,
            subfuncao_ug TEXT,
            adj TEXT,
            macropolitica TEXT,
            pilar TEXT,
            eixo TEXT,
            politica_decreto TEXT,
            exercicio INTEGER,
            situacao TEXT,
            historico TEXT,
            numero_emp TEXT,
            numero_ped TEXT,
            numero_contrato TEXT,
            numero_convenio TEXT,
            dotacao_orcamentaria TEXT,
            funcao TEXT,
            subfuncao TEXT,
            programa_governo TEXT,
            paoe TEXT,
            natureza_despesa TEXT,
            cat_econ TEXT,
            grupo TEXT,
            modalidade TEXT,
            fonte TEXT,
            iduso TEXT,
            elemento TEXT,
            uo TEXT,
            nome_unidade_orcamentaria TEXT,
            ug TEXT,
            nome_unidade_gestora TEXT,
            data_emissao TEXT,
            data_criacao TEXT,
            valor_emp REAL,
            devolucao_gcv REAL,
            valor_emp_devolucao_gcv REAL,
            tipo_empenho TEXT,
            tipo_despesa TEXT,
            credor TEXT,
            nome_credor TEXT,
            cpf_cnpj_credor TEXT,
            categoria_credor TEXT,
            raw_payload TEXT,
            data_atualizacao TEXT NOT NULL,
            data_arquivo TEXT,
            user_email TEXT,
            ativo INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emp_ativo ON emp(ativo)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emp_upload ON emp(upload_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Payment-order ledger rows, one generation per upload
async fn create_nob_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nob (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            upload_id INTEGER NOT NULL,
            exercicio INTEGER,
            numero_nob TEXT,
            numero_nob_estorno TEXT,
            numero_liq TEXT,
            numero_emp TEXT,
            numero_ped TEXT,
            valor_nob REAL,
            devolucao_gcv REAL,
            valor_nob_gcv REAL,
            data_nob TEXT,
            data_cadastro_nob TEXT,
            data_hora_cadastro_liq TEXT,
            dotacao_orcamentaria TEXT,
            natureza_despesa TEXT,
            nome_fonte_recurso TEXT,
            ug TEXT,
            uo TEXT,
            nome_credor_principal TEXT,
            cpf_cnpj_credor_principal TEXT,
            credor TEXT,
            nome_credor TEXT,
            cpf_cnpj_credor TEXT,
            historico_liq TEXT,
            empenho_atual TEXT,
            empenho_rp TEXT,
            funcao TEXT,
            subfuncao TEXT,
            programa_governo TEXT,
            paoe TEXT,
            cat_econ TEXT,
            grupo TEXT,
            modalidade TEXT,
            iduso TEXT,
            raw_payload TEXT,
            data_atualizacao TEXT NOT NULL,
            data_arquivo TEXT,
            user_email TEXT,
            ativo INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nob_ativo ON nob(ativo)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nob_upload ON nob(upload_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Upload job status store: progress, message and cancellation flag per job
async fn create_upload_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_jobs (
            record_type TEXT NOT NULL,
            job_id INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'STARTED',
            progress INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            user_email TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (record_type, job_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
