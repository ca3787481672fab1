//! Bounded exponential retry for transient source failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tzdeleg_core::metrics::increment;

use crate::{Error, Result};

/// How many times, and how patiently, to retry a failing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub wait: Duration,
    /// Upper bound on any single delay.
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Policy with `max_wait` set to three times `wait`.
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self {
            max_retries,
            wait,
            max_wait: wait.saturating_mul(3),
        }
    }

    /// Delay before retry number `retry` (1-based): `wait * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.wait.saturating_mul(1u32 << exp).min(self.max_wait)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Only [`Error::is_transient`] failures are retried. Exhaustion yields
    /// [`Error::RetriesExhausted`] carrying the last failure. Cancellation
    /// during a backoff sleep yields [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if retry >= self.max_retries {
                return Err(if self.max_retries == 0 {
                    err
                } else {
                    Error::RetriesExhausted {
                        attempts: retry + 1,
                        last: Box::new(err),
                    }
                });
            }

            retry += 1;
            let delay = self.delay_for(retry);
            tracing::warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                what,
                err,
                retry,
                self.max_retries,
                delay
            );
            increment("source_retries_total", 1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> Error {
        Error::Status {
            status: 500,
            body: String::new(),
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(10), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = policy
            .run("fetch", &cancel, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(server_error()) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .run("fetch", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Status {
                    status: 400,
                    body: "bad request".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(Error::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .run("fetch", &cancel, || async { Err(server_error()) })
            .await;

        match result {
            Err(Error::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::Status { status: 500, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = policy
            .run("fetch", &cancel, || async { Err(server_error()) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
