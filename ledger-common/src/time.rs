//! Timestamp utilities

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC wall-clock time without offset, the form stored in ledger rows
pub fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Parse a source-file timestamp given as `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`
/// or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_file_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
