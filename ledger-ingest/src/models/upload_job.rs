//! Upload run state machine
//!
//! A run progresses through:
//! STARTED → DEACTIVATING → INSERTING (chunk i of N) → COMPLETED,
//! with CANCELLED and FAILED as terminal states.

use super::record::RecordType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Upload run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    /// Run accepted, nothing written yet
    Started,
    /// Marking the previous generation inactive
    Deactivating,
    /// Committing chunk `chunk` (1-based) of `total_chunks`
    Inserting { chunk: usize, total_chunks: usize },
    /// Every chunk committed
    Completed,
    /// Stopped at a chunk boundary on request
    Cancelled,
    /// Aborted by a fatal error
    Failed,
}

impl UploadState {
    /// Label stored by the job-status store
    pub fn label(&self) -> &'static str {
        match self {
            UploadState::Started => "STARTED",
            UploadState::Deactivating => "DEACTIVATING",
            UploadState::Inserting { .. } => "INSERTING",
            UploadState::Completed => "COMPLETED",
            UploadState::Cancelled => "CANCELLED",
            UploadState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Cancelled | UploadState::Failed
        )
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: &UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Started, Deactivating) | (Started, Failed) => true,
            (Deactivating, Inserting { .. }) | (Deactivating, Completed) | (Deactivating, Failed) => {
                true
            }
            (Inserting { chunk, .. }, Inserting { chunk: next_chunk, .. }) => *next_chunk == chunk + 1,
            (Inserting { .. }, Completed)
            | (Inserting { .. }, Cancelled)
            | (Inserting { .. }, Failed) => true,
            _ => false,
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: UploadState,
    pub new_state: UploadState,
    pub transitioned_at: DateTime<Utc>,
}

/// One persistence run for an upload (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRun {
    /// Correlates log lines of this run
    pub run_id: Uuid,
    pub record_type: RecordType,
    pub upload_id: i64,
    pub state: UploadState,
    /// Rows committed so far
    pub inserted: usize,
    /// Rows in the generation
    pub total: usize,
    /// Last reported percentage, never decreases
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl UploadRun {
    pub fn new(record_type: RecordType, upload_id: i64, total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            record_type,
            upload_id,
            state: UploadState::Started,
            inserted: 0,
            total,
            progress: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: UploadState) -> StateTransition {
        if !self.state.can_transition_to(&new_state) {
            warn!(
                run_id = %self.run_id,
                from = self.state.label(),
                to = new_state.label(),
                "Unexpected upload state transition"
            );
        }

        let transition = StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    /// Record committed rows and return the percentage to report
    ///
    /// `floor(100 * inserted / total)` clamped to 100; an empty generation
    /// reports 100. Never lower than a previous report.
    pub fn record_inserted(&mut self, rows: usize) -> u8 {
        self.inserted += rows;
        let percent = if self.total == 0 {
            100
        } else {
            ((self.inserted as u128 * 100) / self.total as u128).min(100) as u8
        };
        self.progress = self.progress.max(percent);
        self.progress
    }

    /// Mark the run finished; an empty generation jumps to 100
    pub fn finish(&mut self) -> u8 {
        if self.total == 0 || self.inserted >= self.total {
            self.progress = 100;
        }
        self.progress
    }

    /// Human-readable progress line with `inserted/total`
    pub fn progress_message(&self) -> String {
        format!(
            "Writing records to database ({}/{}).",
            self.inserted, self.total
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
