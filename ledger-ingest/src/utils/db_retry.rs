//! Retry of short status writes on transient "database is locked" errors
//!
//! The job-status table is polled by other processes while a run writes
//! chunks, so a status write may briefly hit a lock. Backoff doubles from
//! 10ms up to 1000ms until `max_wait_ms` has elapsed.

use ledger_common::{Error, Result};
use std::time::{Duration, Instant};

/// Default retry budget for status writes
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        _ => false,
    }
}

/// Run `operation`, retrying lock errors with exponential backoff
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt: u32 = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database still locked; giving up"
                    );
                    return Err(Error::LockTimeout {
                        attempts: attempt,
                        elapsed_ms: elapsed.as_millis() as u64,
                        max_wait_ms,
                    });
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("test_op", 1000, || async { Ok::<i32, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_lock_errors_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry_on_lock("test_op", 2000, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(locked())
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<()> = retry_on_lock("test_op", 2000, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("bad".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result: Result<()> = retry_on_lock("test_op", 30, || async { Err(locked()) }).await;
        assert!(matches!(
            result,
            Err(Error::LockTimeout { max_wait_ms: 30, .. })
        ));
    }
}
