//! Bounded retry with exponential backoff for network calls.
//!
//! Shared by the entity extractor, the persistence client and the vision
//! recognition backend. The caller classifies each failure: a
//! [`Failure::Transient`] is retried until the attempt budget is spent, a
//! [`Failure::Permanent`] stops immediately. Only the last error surfaces.
//!
//! The wait before attempt `n + 1` is `initial_backoff * 2^(n - 1)`, capped at
//! `max_backoff`. With the default 500 ms base and 3 attempts the sequence is
//! 500 ms → 1 s.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never zero.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Wait after the failed attempt `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Classification of a single failed attempt.
#[derive(Debug)]
pub enum Failure<E> {
    /// Network error, timeout or retryable status; try again.
    Transient(E),
    /// Retrying cannot help (bad request, undecodable body).
    Permanent(E),
}

impl<E> Failure<E> {
    pub fn into_inner(self) -> E {
        match self {
            Failure::Transient(e) | Failure::Permanent(e) => e,
        }
    }
}

/// The final error after the retry loop gave up.
#[derive(Debug)]
pub struct Exhausted<E> {
    /// Attempts actually made.
    pub attempts: u32,
    pub error: E,
}

/// Run `op` until it succeeds, fails permanently, or the policy is spent.
///
/// `op` receives the 1-based attempt number. `what` names the operation in
/// log lines.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(Failure::Permanent(error)) => {
                warn!("{}: attempt {} failed permanently: {}", what, attempt, error);
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                });
            }
            Err(Failure::Transient(error)) => {
                if attempt >= max {
                    warn!("{}: giving up after {} attempt(s): {}", what, attempt, error);
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                let backoff = policy.backoff_after(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying after {}ms",
                    what,
                    attempt,
                    max,
                    error,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_millis(500))
            .with_max_backoff(Duration::from_millis(1500));
        assert_eq!(p.backoff_after(1), Duration::from_millis(500));
        assert_eq!(p.backoff_after(2), Duration::from_millis(1000));
        assert_eq!(p.backoff_after(3), Duration::from_millis(1500));
        assert_eq!(p.backoff_after(40), Duration::from_millis(1500));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn transient_failures_make_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(4), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Failure::Transient("HTTP 503")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.error, "HTTP 503");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(5), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Failure::Permanent("bad json")) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let result = retry(&fast(3), "test", |attempt| async move {
            if attempt < 3 {
                Err(Failure::Transient(format!("attempt {attempt}")))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn first_success_is_returned_as_is() {
        let result: Result<&str, Exhausted<&str>> =
            tokio_test::block_on(retry(&fast(3), "test", |_| async { Ok("done") }));
        assert_eq!(tokio_test::assert_ok!(result), "done");
    }
}
