//! A single retry combinator shared by the adapter's unary and streaming call sites,
//! parameterized by the classifier and backoff schedule (§9: "retry loops mixed into
//! business logic" is the pattern this replaces).

use crate::error::{ErrorKind, GatewayError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl BackoffConfig {
    /// `min(initial * 2^attempt, max)`, attempt is 0-indexed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max)
    }
}

/// Runs `f` up to `backoff.max_retries` total attempts, retrying only when the
/// classified error is retryable, sleeping `backoff_for(attempt)` between tries.
/// `request_id` and `op_name` are logged on every retry so attempts can be correlated.
pub async fn retry_with_backoff<T, F, Fut>(
    backoff: BackoffConfig,
    op_name: &str,
    request_id: &str,
    mut f: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.retryable
                    && !matches!(
                        err.kind(),
                        ErrorKind::InvalidInput
                            | ErrorKind::InvalidSession
                            | ErrorKind::Unauthorized
                            | ErrorKind::MalformedResponse
                    );
                if !retryable || attempt + 1 >= backoff.max_retries {
                    return Err(err);
                }
                let delay = backoff.backoff_for(attempt);
                warn!(
                    op = op_name,
                    request_id,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    code = err.code,
                    "retrying after classified error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cfg = BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            max_retries: 10,
        };
        assert_eq!(cfg.backoff_for(0), Duration::from_secs(1));
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(2));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(4));
        assert_eq!(cfg.backoff_for(3), Duration::from_secs(5));
        assert_eq!(cfg.backoff_for(10), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let backoff = BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_retries: 5,
        };
        let result = retry_with_backoff(backoff, "invoke", "req-1", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::new(ErrorKind::RateLimit, "throttled"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let backoff = BackoffConfig::default();
        let result: Result<(), GatewayError> =
            retry_with_backoff(backoff, "invoke", "req-2", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::new(ErrorKind::InvalidInput, "bad input")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retry_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let backoff = BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_retries: 3,
        };
        let result: Result<(), GatewayError> =
            retry_with_backoff(backoff, "invoke", "req-3", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::new(ErrorKind::ServerError, "boom")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
