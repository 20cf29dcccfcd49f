//! ledger-ingest library interface
//!
//! Reconciles raw ledger uploads (commitments and payment orders) and commits
//! them as the new active generation of their table.

pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod services;
pub mod utils;
pub mod vocabulary;

pub use crate::error::{IngestError, IngestResult};
