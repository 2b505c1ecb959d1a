//! Async test helpers

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Timeout marker for test futures that never resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError;

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimeoutError {}

/// Run a future with a timeout, returning Ok(result) or Err on timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future).await.map_err(|_| TimeoutError)
}

/// Poll `condition` until it holds or the deadline passes
pub async fn wait_until<F>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let started = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_times_out() {
        let result = with_timeout(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert_eq!(result, Err(TimeoutError));
    }

    #[tokio::test]
    async fn test_wait_until() {
        let mut calls = 0;
        let ok = wait_until(Duration::from_secs(1), || {
            calls += 1;
            calls >= 3
        })
        .await;
        assert!(ok);
    }
}
