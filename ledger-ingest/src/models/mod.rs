//! Data models for ledger ingest

pub mod record;
pub mod upload_job;

pub use record::{
    FieldValue, GenerationSummary, KeyScheme, RawField, RawRecord, RecordType, UploadContext,
    CURRENT_SCHEME_FIRST_YEAR, LEGACY_PLANNING_COLUMNS,
};
pub use upload_job::{StateTransition, UploadRun, UploadState};
