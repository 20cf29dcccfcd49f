//! Error type shared by the ledger crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the database directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config could not be found, read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A status write kept hitting "database is locked" past its retry budget
    #[error("Database locked after {attempts} attempts ({elapsed_ms} ms elapsed, max {max_wait_ms} ms)")]
    LockTimeout {
        attempts: u32,
        elapsed_ms: u64,
        max_wait_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_message() {
        let err = Error::LockTimeout {
            attempts: 7,
            elapsed_ms: 5012,
            max_wait_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Database locked after 7 attempts (5012 ms elapsed, max 5000 ms)"
        );
    }
}
