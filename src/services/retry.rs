//! Bounded exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LoadBalancerConfig;

/// Retry policy for operations that fail while another worker holds a lock.
///
/// Only transient errors are retried. The delay before retry `n` (0-indexed)
/// is `initial_delay_ms * 2^n` plus a random jitter in `0..=max_jitter_ms`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 100, 100)
    }
}

impl From<&LoadBalancerConfig> for RetryPolicy {
    fn from(config: &LoadBalancerConfig) -> Self {
        Self::new(
            config.lock_retry_attempts,
            config.lock_backoff_initial_ms,
            config.lock_backoff_max_jitter_ms,
        )
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_jitter_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_ms,
            max_jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. Cancellation during a backoff returns `Cancelled`.
    pub async fn execute<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "giving up on operation");
                return Err(DomainError::RetryLimitExceeded {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let backoff = self.calculate_backoff(attempt - 1);
            debug!(attempt, ?backoff, error = %err, "transient failure, backing off");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DomainError::Cancelled),
                () = sleep(backoff) => {}
            }
        }
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.max_jitter_ms)
        };
        Duration::from_millis(self.base_backoff_ms(attempt).saturating_add(jitter))
    }

    fn base_backoff_ms(&self, attempt: u32) -> u64 {
        self.initial_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, 100, 0);

        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5, 10, 50);
        for _ in 0..100 {
            let backoff = policy.calculate_backoff(1).as_millis();
            assert!((20..=70).contains(&backoff), "backoff {backoff} out of range");
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(5, u64::MAX / 2, 0);
        assert_eq!(policy.base_backoff_ms(10), u64::MAX);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, 1, 1).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_execute_recovers_from_transient_errors() {
        let policy = RetryPolicy::new(5, 1, 1);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = policy
            .execute(&CancellationToken::new(), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DomainError::NodesUnavailable("eth".to_string()))
                    } else {
                        Ok("n1")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "n1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, 1, 0);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = policy
            .execute(&CancellationToken::new(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DomainError::NodesUnavailable("eth".to_string()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::RetryLimitExceeded { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(5, 1, 0);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = policy
            .execute(&CancellationToken::new(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DomainError::WebhookNotFound("w1".to_string()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::WebhookNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_stops_on_cancel() {
        let policy = RetryPolicy::new(5, 60_000, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = policy
            .execute(&cancel, || async {
                Err::<(), _>(DomainError::NodesUnavailable("eth".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Cancelled));
    }
}
