use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Redelivery with exponential backoff
// ============================================================================
//
// Redelivery policy for consumer invocations. Asynchronous function targets
// retry transient failures before routing the event to their on-failure
// queue; stream batches retry poison records before dead-lettering them.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::async_invocation()
    }
}

impl RetryConfig {
    /// Asynchronous function invocation: one attempt plus two retries
    pub fn async_invocation() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    /// Retries without any delay, used for stream batches where ordering
    /// within the shard matters more than backoff
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all attempts
    Failed(E),
    /// Operation failed with an error that must not be retried
    PermanentFailure(E),
}

/// Errors that may succeed on a later attempt
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry every failure until the attempts run out
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    run_attempts(config, operation, |_| true).await
}

/// Retry transient failures only; a permanent failure ends the loop at once
pub async fn retry_on_transient<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + IsTransient,
{
    run_attempts(config, operation, E::is_transient).await
}

async fn run_attempts<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
    retryable: impl Fn(&E) -> bool,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Invocation succeeded on redelivery");
                }
                return RetryResult::Success(value);
            }
            Err(error) => error,
        };

        if !retryable(&error) {
            tracing::error!(attempt, error = %error, "Permanent failure, giving up");
            return RetryResult::PermanentFailure(error);
        }
        if attempt >= config.max_attempts {
            tracing::error!(attempt, error = %error, "Attempts exhausted");
            return RetryResult::Failed(error);
        }

        tracing::warn!(
            attempt,
            max_attempts = config.max_attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Invocation failed, redelivering"
        );
        if !delay.is_zero() {
            sleep(delay).await;
        }
        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl IsTransient for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(fast(), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("temporary failure")
                } else {
                    Ok("delivered")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success("delivered")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let result = retry_with_backoff(RetryConfig::immediate(2), |_attempt| async {
            Err::<(), _>("persistent failure")
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_on_transient(fast(), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(false))
            }
        })
        .await;

        assert!(matches!(result, RetryResult::PermanentFailure(Flaky(false))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_uses_all_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_on_transient(fast(), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(true))
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(Flaky(true))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = fast();
        let delay = config.next_delay(Duration::from_millis(15));
        assert_eq!(delay, Duration::from_millis(20));
    }
}
