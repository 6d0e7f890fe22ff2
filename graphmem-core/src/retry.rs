//! Bounded retry with linear backoff for table operations.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry policy for storage writes.
///
/// Attempt `n` (1-based) that fails with a transient error is followed by a
/// sleep of `n * backoff_unit_ms` before attempt `n + 1`. The error of the
/// final attempt is returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff step in milliseconds
    pub backoff_unit_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts,
            backoff_unit_ms: backoff_unit.as_millis() as u64,
        }
    }

    /// Policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_unit_ms: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit_ms = unit.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(attempt as u64))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient storage failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert!(matches!(policy.validate(), Err(Error::Config(_))));
        assert!(RetryPolicy::no_retry().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = policy
            .run("append", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::transient("append", "database is locked"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .run("merge", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(Error::transient("merge", format!("failure {}", n)))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("failure 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .run("insert", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::empty_input("insert"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::EmptyInput { .. }));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_linear(unit in 0u64..10_000, attempt in 1u32..50) {
            let policy = RetryPolicy::default().with_backoff_unit(Duration::from_millis(unit));
            prop_assert_eq!(policy.backoff(attempt), Duration::from_millis(unit * attempt as u64));
            prop_assert!(policy.backoff(attempt + 1) >= policy.backoff(attempt));
        }
    }
}
