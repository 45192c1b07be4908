use std::future::Future;
use std::time::Duration;

use market_core::FetchError;

/// Exponential-backoff retry for transport failures.
///
/// Only `FetchError::Transport` is retried. Rate-limit signals surface
/// immediately so the manager can put the adapter in cool-down instead of
/// hammering it with backoff; parse and empty results are final by
/// definition.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub const fn new(multiplier: Duration, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: 3,
            multiplier,
            min_wait,
            max_wait,
        }
    }

    fn wait_for(&self, attempt: u32) -> Duration {
        let backoff = self.multiplier.mul_f64(2f64.powi(attempt as i32));
        backoff.clamp(self.min_wait, self.max_wait)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(30),
        )
    }
}

pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    source: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transport() && attempt + 1 < policy.max_attempts => {
                let wait = policy.wait_for(attempt);
                tracing::warn!(
                    source,
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    wait_secs = wait.as_secs_f64(),
                    %err,
                    "transport error, backing off before retry"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(2),
        )
    }

    #[tokio::test]
    async fn transport_errors_retry_up_to_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Transport("connection refused".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::RateLimit("429".into())) }
        })
        .await;
        assert!(matches!(result, Err(FetchError::RateLimit(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::Parse("bad payload".into())) }
        })
        .await;
        assert!(matches!(result, Err(FetchError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FetchError::Transport("timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_clamped() {
        let policy = RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(30),
        );
        assert_eq!(policy.wait_for(0), Duration::from_secs(2));
        assert_eq!(policy.wait_for(1), Duration::from_secs(2));
        assert_eq!(policy.wait_for(2), Duration::from_secs(4));
        assert_eq!(policy.wait_for(10), Duration::from_secs(30));
    }
}
