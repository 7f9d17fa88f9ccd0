//! Bounded retry with exponential backoff and jitter.
//!
//! Applied at the HTTP call boundary; only errors classified as transient
//! by [`SyncError::is_transient`] are re-attempted.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};

/// Retry policy driving backoff delays and the attempt budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a new policy from configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum number of retries after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Parses a `Retry-After` header value. Only the seconds format is
    /// supported; HTTP-date values are ignored.
    #[must_use]
    pub fn parse_retry_after(header_value: &str) -> Option<u64> {
        header_value.trim().parse::<u64>().ok()
    }

    /// Exponential delay for a 0-indexed attempt, capped at the configured
    /// maximum. No jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let delay_ms = (base * 2_f64.powi(attempt as i32)).min(max);
        Duration::from_millis(delay_ms as u64)
    }

    /// Adds up to `jitter_factor` of extra delay.
    #[must_use]
    pub fn add_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        use rand::Rng;
        let delay_ms = delay.as_millis() as f64;
        let jitter_range = delay_ms * self.config.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
        Duration::from_millis((delay_ms + jitter) as u64)
    }

    /// The delay to sleep before the next attempt. A server-provided
    /// `Retry-After` wins over exponential backoff, capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let delay = match retry_after_secs {
            Some(secs) => Duration::from_secs(secs.min(self.config.max_delay_ms / 1000)),
            None => self.backoff_delay(attempt),
        };
        self.add_jitter(delay)
    }

    /// Executes an operation, retrying transient failures until the attempt
    /// budget is exhausted.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let retry_after = match &e {
                        SyncError::RateLimited { retry_after_secs } => *retry_after_secs,
                        _ => None,
                    };
                    let delay = self.delay_for(attempt, retry_after);
                    attempt += 1;
                    debug!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(SyncError::MaxRetriesExceeded { attempts: attempt })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn no_jitter_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 60_000,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(RetryPolicy::parse_retry_after("60"), Some(60));
        assert_eq!(RetryPolicy::parse_retry_after("  120  "), Some(120));
        assert_eq!(RetryPolicy::parse_retry_after("invalid"), None);
        assert_eq!(RetryPolicy::parse_retry_after(""), None);
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let policy = no_jitter_policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_delay_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            jitter_factor: 0.0,
        });
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_retry_after_wins_and_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        });
        assert_eq!(policy.delay_for(0, Some(3)), Duration::from_secs(3));
        // 600s header capped at max_delay (10s)
        assert_eq!(policy.delay_for(0, Some(600)), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_factor: 0.25,
        });
        for _ in 0..100 {
            let delay = policy.add_jitter(Duration::from_millis(1000)).as_millis() as u64;
            assert!((1000..=1250).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_execute_succeeds_first_try() {
        let policy = no_jitter_policy();
        let calls = AtomicUsize::new(0);

        let result = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_retries_transient() {
        let policy = RetryPolicy::new(RetryConfig::for_testing());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .execute(move || {
                let count = calls_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(SyncError::Transient("unavailable".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_permanent() {
        let policy = no_jitter_policy();
        let calls = AtomicUsize::new(0);

        let result: SyncResult<i32> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Auth("bad credentials".into())) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_exhausts_budget() {
        let policy = RetryPolicy::new(RetryConfig::for_testing());
        let calls = AtomicUsize::new(0);

        let result: SyncResult<i32> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::RateLimited {
                        retry_after_secs: None,
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SyncError::MaxRetriesExceeded { attempts: 2 })
        ));
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
