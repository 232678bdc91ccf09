//! Database Retry Logic
//!
//! Store writes get exactly one retry. Each attempt runs a whole transaction,
//! so a failed attempt has already rolled back and leaves no partial state.

use accessmap_common::Result;
use std::time::{Duration, Instant};

use crate::db::StoreError;

/// Run a store write, retrying once after `backoff` on any error
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. On error: log WARN, sleep `backoff`, attempt once more
/// 4. If the retry fails too: log ERROR, return `StoreError::WriteFailure`
///
/// Lock contention is logged separately because it usually means another
/// process holds the database.
pub async fn retry_write<F, Fut, T>(operation_name: &str, backoff: Duration, mut operation: F) -> std::result::Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();

    let first_err = match operation().await {
        Ok(result) => return Ok(result),
        Err(err) => err,
    };

    tracing::warn!(
        operation = operation_name,
        lock_contention = first_err.is_lock_contention(),
        backoff_ms = backoff.as_millis() as u64,
        error = %first_err,
        "Store write failed, will retry once after backoff"
    );

    tokio::time::sleep(backoff).await;

    match operation().await {
        Ok(result) => {
            tracing::debug!(
                operation = operation_name,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Store write succeeded after retry"
            );
            Ok(result)
        }
        Err(err) => {
            tracing::error!(
                operation = operation_name,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                error = %err,
                "Store write failed after retry"
            );
            Err(StoreError::WriteFailure(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessmap_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_write("test_op", Duration::ZERO, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_second_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_write("test_op", Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Internal("transient".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_one_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: std::result::Result<(), StoreError> = retry_write("test_op", Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Internal("disk full".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::WriteFailure(msg)) if msg.contains("disk full")));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
