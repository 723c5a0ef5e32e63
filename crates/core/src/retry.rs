//! Exponential-backoff retry policy.
//!
//! A [`RetryPolicy`] wraps a single fallible async operation. Errors the
//! caller classifies as transient are retried with a delay that grows by
//! `multiplier` after each failure, capped at `max_delay`. Any other error
//! fails immediately on the attempt that produced it.

use std::future::Future;
use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// The operation gave up, either on a permanent error or after the last
/// allowed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after `failed_attempt` (1-based) failed.
    ///
    /// `base_delay * multiplier^(failed_attempt - 1)`, clamped to
    /// `max_delay`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let ms = self.base_delay.as_millis() as f64 * factor;
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(ms.min(max_ms) as u64)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of
    /// attempts.
    ///
    /// `is_transient` decides whether an error may be retried.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut op: F,
        is_transient: P,
    ) -> Result<(T, u32), RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if is_transient(&e) && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Timeout,
        Unauthorized,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(e: &FakeError) -> bool {
        matches!(e, FakeError::Timeout)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(250),
        }
    }

    // -- delay_after --

    #[test]
    fn delay_grows_by_multiplier() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
    }

    #[test]
    fn delay_is_clamped_to_max() {
        let p = policy();
        assert_eq!(p.delay_after(3), Duration::from_millis(250));
        assert_eq!(p.delay_after(30), Duration::from_millis(250));
    }

    // -- run --

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_all_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result: Result<((), u32), _> = policy()
            .run(
                |_| {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(FakeError::Timeout)
                    }
                },
                transient,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, FakeError::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100 ms + 200 ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result: Result<((), u32), _> = policy()
            .run(
                |_| {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(FakeError::Unauthorized)
                    }
                },
                transient,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_reports_attempt_count() {
        let result = policy()
            .run(
                |attempt| async move {
                    if attempt < 2 {
                        Err(FakeError::Timeout)
                    } else {
                        Ok("ok")
                    }
                },
                transient,
            )
            .await;

        assert_eq!(result.unwrap(), ("ok", 2));
    }

    #[tokio::test]
    async fn no_retry_policy_runs_once() {
        let result: Result<((), u32), _> = RetryPolicy::no_retry()
            .run(|_| async { Err(FakeError::Timeout) }, transient)
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
