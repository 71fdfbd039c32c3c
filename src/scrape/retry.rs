//! Per-item retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::core::errors::ScrapeError;
use crate::core::types::SourceKind;
use crate::output::ErrorSink;

/// Backoff base: waits are 1s, 2s, 4s, …
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Call `op` up to `max_retries` times, waiting `1s · 2^attempt` between
/// attempts. Success returns immediately; an error classified as
/// non-retryable fails fast without further attempts. Exhaustion logs one
/// structured error record and re-raises the final error to the caller.
pub async fn retry_with_backoff<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    sku: &str,
    source: SourceKind,
    errors: &ErrorSink,
) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
{
    debug_assert!(max_retries > 0);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let attempts = attempt + 1;
                if attempts >= max_retries || !e.is_retryable() {
                    errors.log(
                        sku,
                        source,
                        &format!("Failed after {} attempts: {}", attempts, e),
                    );
                    return Err(e);
                }
                let wait = BACKOFF_BASE * 2u32.pow(attempt);
                info!(
                    "retry: {}/{} for {} ({}) after {:?}: {}",
                    attempt + 1,
                    max_retries,
                    sku,
                    source,
                    wait,
                    e
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn sinks() -> (tempfile::TempDir, ErrorSink) {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ErrorSink::new(tmp.path().join("errors.log"));
        (tmp, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let (tmp, errors) = sinks();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = Arc::clone(&calls);

        let result = retry_with_backoff(
            move || {
                let calls = Arc::clone(&calls_op);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(ScrapeError::TransientFetch("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            3,
            "SKU1",
            SourceKind::Amazon,
            &errors,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No error record on eventual success.
        assert!(!tmp.path().join("errors.log").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_logs_once_and_reraises() {
        let (tmp, errors) = sinks();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let calls = Arc::clone(&calls_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ScrapeError::TransientFetch("always down".into()))
                }
            },
            2,
            "SKU2",
            SourceKind::Walmart,
            &errors,
        )
        .await;

        assert!(matches!(result, Err(ScrapeError::TransientFetch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let log = std::fs::read_to_string(tmp.path().join("errors.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("SKU: SKU2 | Source: Walmart"));
        assert!(log.contains("Failed after 2 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_fast() {
        let (tmp, errors) = sinks();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = Arc::clone(&calls);

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let calls = Arc::clone(&calls_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ScrapeError::ChallengeUnresolved)
                }
            },
            3,
            "SKU4",
            SourceKind::Walmart,
            &errors,
        )
        .await;

        assert!(matches!(result, Err(ScrapeError::ChallengeUnresolved)));
        // A session-fatal error never earns a second attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let log = std::fs::read_to_string(tmp.path().join("errors.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("Failed after 1 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success_is_single_call() {
        let (_tmp, errors) = sinks();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = Arc::clone(&calls);

        let result = retry_with_backoff(
            move || {
                let calls = Arc::clone(&calls_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ScrapeError>("ok")
                }
            },
            3,
            "SKU3",
            SourceKind::Amazon,
            &errors,
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
