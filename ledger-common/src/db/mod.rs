//! Database initialization for the ledger tables

pub mod init;

pub use init::{create_tables, init_database, init_memory_database};
