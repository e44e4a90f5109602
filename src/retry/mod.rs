//! Bounded retry with multiplicative backoff.
//!
//! A [`RetryPolicy`] is handed to the call site explicitly. Errors matching the
//! policy's exclusion predicate are returned after the first attempt; every other
//! error is retried until the attempt limit, and the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use crate::{error_kind, Result, VidSnatchError};

/// Decides that an error must not be retried
pub type ExcludePredicate = fn(&anyhow::Error) -> bool;

/// Retry configuration for one call site
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Errors for which retrying cannot help
    pub exclude: ExcludePredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5), 2.0)
    }
}

/// Invalid URLs never become valid by asking again.
pub fn is_invalid_url(err: &anyhow::Error) -> bool {
    matches!(error_kind(err), Some(VidSnatchError::InvalidUrl(_)))
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_multiplier,
            exclude: is_invalid_url,
        }
    }

    pub fn with_exclude(mut self, exclude: ExcludePredicate) -> Self {
        self.exclude = exclude;
        self
    }

    /// Delay slept after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails with an excluded error, or attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if (self.exclude)(&err) => {
                    tracing::debug!("{} failed with a non-retryable error: {}", label, err);
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::warn!("{} failed after {} attempts: {}", label, attempt, err);
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay.as_secs_f64(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, 2.0)
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = quick_policy(3)
            .run("resolve", || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(VidSnatchError::Provider("connection reset".into()).into())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_url_is_attempted_once() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<()> = quick_policy(5)
            .run("resolve", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(VidSnatchError::InvalidUrl("not-a-video".into()).into())
            })
            .await;

        let err = assert_err!(result);
        assert!(is_invalid_url(&err));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_error_surfaces_after_exhaustion() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<()> = quick_policy(3)
            .run("resolve", || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Err(VidSnatchError::Provider(format!("failure {}", n)).into())
            })
            .await;

        let err = assert_err!(result);
        assert!(err.to_string().contains("failure 3"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_custom_exclusion() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let policy = quick_policy(4).with_exclude(|_| true);
        let result: Result<()> = policy
            .run("resolve", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("anything"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_multiplicatively() {
        let policy = RetryPolicy::new(4, Duration::from_secs(5), 2.0);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 1.0).max_attempts, 1);
    }
}
