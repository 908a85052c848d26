//! Bounded retry with exponential backoff.
//!
//! [`BackoffPolicy`] computes the delay before a retry; [`retry_with_backoff`]
//! drives an async operation through at most `max_attempts` tries. Relay
//! verification uses the combinator directly, the offline drain uses the
//! policy to space out failed cycles.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`.
//!
//! ```
//! use std::time::Duration;
//! use gatehouse_core::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 50ms doubling up to 1s.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(50),
            max: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy with a constant delay.
    #[must_use]
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }
}

/// Failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// The operation returned an error that must not be retried.
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts performed.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error returned by the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Aborted { attempts, error } => {
                write!(f, "aborted on attempt {attempts}: {error}")
            }
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds or `max_attempts` tries have failed.
///
/// `op` receives the 0-based attempt number. Between two attempts the task
/// sleeps for `policy.next(attempt)`.
///
/// # Errors
/// Returns [`RetryError::Exhausted`] with the last error once every attempt
/// failed. `max_attempts == 0` is treated as 1.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_while(policy, max_attempts, op, |_| true).await
}

/// Like [`retry_with_backoff`] but stops early when `retryable` rejects an error.
///
/// # Errors
/// Returns [`RetryError::Aborted`] for a non-retryable error and
/// [`RetryError::Exhausted`] when attempts run out.
pub async fn retry_with_backoff_while<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    mut op: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !retryable(&error) => {
                return Err(RetryError::Aborted {
                    attempts: attempt + 1,
                    error,
                });
            }
            Err(error) if attempt + 1 >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: error,
                });
            }
            Err(_) => {
                let delay = policy.next(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
