//! ledger-ingest - Ledger upload reconciliation and loading
//!
//! `run` reconciles a batch of raw rows and commits it as the new active
//! generation of its table. `cancel` asks a running job to stop at its next
//! chunk boundary.
//!
//! Exit codes: 0 success, 2 cancelled, 1 failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use ledger_common::config::TomlConfig;
use ledger_ingest::config::{CliOverrides, IngestConfig};
use ledger_ingest::db::SqliteJobStatus;
use ledger_ingest::models::{RecordType, UploadContext};
use ledger_ingest::services::{read_records, RunOutcome, UploadService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ledger-ingest")]
#[command(about = "Reconcile and load ledger uploads")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to the platform config locations)
    #[arg(long, global = true, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database and resource files
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Database file (defaults to <root-folder>/ledger.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a rows file and persist it as a new generation
    Run(RunArgs),
    /// Request cancellation of a running upload job
    Cancel {
        #[arg(long)]
        record_type: RecordType,
        #[arg(long)]
        upload_id: i64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// emp or nob
    #[arg(long)]
    record_type: RecordType,

    /// JSON array of row objects
    #[arg(long)]
    rows: PathBuf,

    #[arg(long)]
    upload_id: i64,

    /// Uploader e-mail
    #[arg(long)]
    user: String,

    /// Source file date, YYYY-MM-DD[THH:MM:SS]
    #[arg(long, value_parser = parse_file_date)]
    file_date: NaiveDateTime,

    /// Enable the approximate-match tier
    #[arg(long)]
    fuzzy: bool,

    /// Rows per insert transaction
    #[arg(long)]
    chunk_size: Option<usize>,
}

fn parse_file_date(text: &str) -> std::result::Result<NaiveDateTime, String> {
    ledger_common::time::parse_file_timestamp(text)
        .ok_or_else(|| format!("invalid date '{}' (expected YYYY-MM-DD[THH:MM:SS])", text))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let toml = TomlConfig::load_or_default(cli.config.as_deref());

    let level = &toml.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ledger_ingest={0},ledger_common={0}", level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match execute(cli, toml).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn execute(cli: Cli, toml: TomlConfig) -> Result<ExitCode> {
    let overrides = CliOverrides {
        root_folder: cli.root_folder,
        database: cli.db,
        ..Default::default()
    };

    match cli.command {
        Command::Run(args) => {
            let overrides = CliOverrides {
                chunk_size: args.chunk_size,
                fuzzy: args.fuzzy,
                ..overrides
            };
            run(IngestConfig::resolve(&toml, &overrides), args).await
        }
        Command::Cancel {
            record_type,
            upload_id,
        } => cancel(IngestConfig::resolve(&toml, &overrides), record_type, upload_id).await,
    }
}

async fn run(config: IngestConfig, args: RunArgs) -> Result<ExitCode> {
    info!("Starting ledger-ingest {}", env!("CARGO_PKG_VERSION"));

    let pool = ledger_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let job_status = Arc::new(SqliteJobStatus::new(pool.clone()));
    job_status
        .register_job(args.record_type, args.upload_id, &args.user)
        .await
        .context("Failed to register upload job")?;

    let records = read_records(&args.rows)
        .await
        .with_context(|| format!("Failed to read rows from {}", args.rows.display()))?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping at the next chunk boundary");
            ctrl_c_token.cancel();
        }
    });

    let context = UploadContext {
        upload_id: args.upload_id,
        user_email: args.user,
        file_timestamp: args.file_date,
    };
    let service = UploadService::new(pool, job_status, config.load_resources(), &config);

    match service
        .run(args.record_type, &records, &context, &cancel)
        .await
        .context("Upload failed")?
    {
        RunOutcome::Completed(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Cancelled {
            rows_committed,
            chunks_committed,
        } => {
            warn!(rows_committed, chunks_committed, "processing cancelled");
            eprintln!(
                "processing cancelled ({} rows in {} chunks committed)",
                rows_committed, chunks_committed
            );
            Ok(ExitCode::from(2))
        }
    }
}

async fn cancel(config: IngestConfig, record_type: RecordType, upload_id: i64) -> Result<ExitCode> {
    let pool = ledger_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let job_status = SqliteJobStatus::new(pool);

    if job_status.request_cancel(record_type, upload_id).await? {
        info!(record_type = %record_type, upload_id, "Cancellation requested");
        Ok(ExitCode::SUCCESS)
    } else {
        anyhow::bail!("No {} job with upload id {}", record_type, upload_id)
    }
}
