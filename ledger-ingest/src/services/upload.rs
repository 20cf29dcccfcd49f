//! Upload orchestration
//!
//! Reads a batch of raw rows, reconciles it for its record type and hands the
//! canonical rows to the persistence pipeline.

use crate::config::IngestConfig;
use crate::db::jobs::JobStatus;
use crate::error::{IngestError, IngestResult};
use crate::models::{RawRecord, RecordType, UploadContext};
use crate::reconcile::commitment::FuzzyOptions;
use crate::reconcile::{reconcile_commitments, reconcile_payment_orders};
use crate::services::persistence_pipeline::{PersistencePipeline, RunOutcome};
use crate::vocabulary::MatchingResources;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Parse a JSON array of row objects
pub fn parse_records(json: &str) -> IngestResult<Vec<RawRecord>> {
    let json = json.strip_prefix('\u{feff}').unwrap_or(json);
    let Value::Array(items) = serde_json::from_str::<Value>(json)? else {
        return Err(IngestError::Schema(
            "rows document must be a JSON array of objects".to_string(),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => Ok(RawRecord::from_json_object(object)),
            _ => Err(IngestError::Schema(format!(
                "row {} is not a JSON object",
                index
            ))),
        })
        .collect()
}

/// Read a rows file written as a JSON array of objects
pub async fn read_records(path: &Path) -> IngestResult<Vec<RawRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    let records = parse_records(&content)?;
    info!(path = %path.display(), rows = records.len(), "Rows loaded");
    Ok(records)
}

/// Reconcile-then-persist for one upload
pub struct UploadService {
    resources: MatchingResources,
    fuzzy: FuzzyOptions,
    pipeline: PersistencePipeline,
}

impl UploadService {
    pub fn new(
        pool: SqlitePool,
        job_status: Arc<dyn JobStatus>,
        resources: MatchingResources,
        config: &IngestConfig,
    ) -> Self {
        Self {
            resources,
            fuzzy: config.fuzzy,
            pipeline: PersistencePipeline::new(pool, job_status, config.pipeline_config()),
        }
    }

    pub async fn run(
        &self,
        record_type: RecordType,
        records: &[RawRecord],
        context: &UploadContext,
        cancel: &CancellationToken,
    ) -> IngestResult<RunOutcome> {
        info!(
            record_type = %record_type,
            upload_id = context.upload_id,
            rows = records.len(),
            "Reconciling upload"
        );

        match record_type {
            RecordType::Commitment => {
                let rows = reconcile_commitments(records, &self.resources, self.fuzzy)?;
                self.pipeline.persist(context, &rows, cancel).await
            }
            RecordType::PaymentOrder => {
                let rows = reconcile_payment_orders(records)?;
                self.pipeline.persist(context, &rows, cancel).await
            }
        }
    }
}
