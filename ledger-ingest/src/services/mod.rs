//! Ingest services

pub mod persistence_pipeline;
pub mod snapshot;
pub mod upload;

pub use persistence_pipeline::{PersistencePipeline, PipelineConfig, RunOutcome};
pub use snapshot::{snapshot_json, snapshot_value};
pub use upload::{parse_records, read_records, UploadService};
