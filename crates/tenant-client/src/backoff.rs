//! Bounded retry with a growing delay.
//!
//! Tenant-manager lookups are idempotent, so transient failures (transport
//! errors, 5xx answers) are retried a bounded number of times before the
//! error surfaces. The delay grows quadratically from the starting interval:
//! with the default five attempts the sleeps between them are 2 s, 8 s,
//! 18 s and 32 s.

use crate::error::TenantManagerError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub(crate) const RETRY_ATTEMPTS: u32 = 5;
pub(crate) const RETRY_START_DELAY: Duration = Duration::from_secs(2);

/// Quadratic backoff calculator.
///
/// Yields the delay to sleep before each retry, `start * n^2` for the n-th
/// retry, until the attempt budget is spent.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    start: Duration,
    attempts: u32,
    retries_done: u32,
}

impl RetryBackoff {
    #[must_use]
    pub fn new(start: Duration, attempts: u32) -> Self {
        Self {
            start,
            attempts,
            retries_done: 0,
        }
    }

    /// The delay before the next attempt, `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.retries_done += 1;
        // the first attempt is not a retry; the budget counts attempts
        if self.retries_done >= self.attempts {
            return None;
        }
        Some(self.start * self.retries_done * self.retries_done)
    }
}

/// Run `operation` until it yields a non-transient result, sleeping the
/// backoff delay between attempts.
pub(crate) async fn with_retry<T, F, Fut>(operation: F) -> Result<T, TenantManagerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TenantManagerError>>,
{
    let mut backoff = RetryBackoff::new(RETRY_START_DELAY, RETRY_ATTEMPTS);
    loop {
        match operation().await {
            Err(err) if err.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    warn!("Request to tenant-manager failed: {err}. Sleep {delay:?} before retry");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_quadratically() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(2), 5);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(18)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(32)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TenantManagerError::UnexpectedStatus {
                    status: 503,
                    message: String::new(),
                })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_surfaces_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TenantManagerError::UnexpectedStatus {
                status: 502,
                message: String::new(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TenantManagerError::TenantNotFound)
        })
        .await;
        assert!(matches!(result, Err(TenantManagerError::TenantNotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
