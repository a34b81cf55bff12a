//! Exponential-backoff retry for transient catalog fetch failures.
//!
//! Applied at call sites (option fetches, page loads, pool priming), never
//! inside the row pipeline: a row that fails persists its error upward.

use crate::error::{Cancelled, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Runs `operation` up to `1 + max_retries` times, doubling `base_delay`
/// after each failure. Cancellation is honored between attempts and is
/// never retried.
pub async fn with_retries<T, F, Fut>(
    operation_name: &str,
    max_retries: u32,
    base_delay: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => return Err(err),
            Err(err) if attempt < max_retries => {
                let delay = base_delay * 2u32.saturating_pow(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay = ?delay,
                    error = ?err,
                    "Catalog operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result = with_retries("op", 3, Duration::ZERO, &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result = with_retries("op", 3, Duration::ZERO, &cancel, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("flaky"))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<()> = with_retries("op", 2, Duration::ZERO, &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("down"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = with_retries("op", 5, Duration::ZERO, &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.unwrap_err().downcast_ref::<Cancelled>().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
