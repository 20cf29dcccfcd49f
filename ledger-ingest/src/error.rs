//! Error types for ledger-ingest
//!
//! Expected outcomes are not errors: an unclassified narrative is
//! `MatchTier::NotIdentified` and a cancelled run is
//! `RunOutcome::Cancelled`. Everything here aborts the run.

use thiserror::Error;

/// Fatal ingest error
#[derive(Debug, Error)]
pub enum IngestError {
    /// A required field is structurally absent from the batch
    #[error("Schema error: {0}")]
    Schema(String),

    /// Chunk insert failed; the chunk was rolled back, earlier chunks stay
    #[error("Persistence failed on chunk {chunk}: {source}")]
    Persistence {
        chunk: usize,
        #[source]
        source: sqlx::Error,
    },

    /// Prior generation could not be deactivated; nothing was inserted
    #[error("Deactivation of prior generation failed: {0}")]
    Deactivation(#[source] sqlx::Error),

    /// Auxiliary resource unreadable or malformed
    #[error("Resource error: {0}")]
    Resource(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ledger-common error
    #[error("Common error: {0}")]
    Common(#[from] ledger_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;
