//! # Ledger Common Library
//!
//! Shared code for the ledger reconciliation tools including:
//! - Error type shared by every crate in the workspace
//! - Configuration loading (TOML file, environment, command line)
//! - Database bootstrap for the ledger tables and the upload job store
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
