//! Exponential backoff with full jitter for transient remote failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

/// Classification of an error as transient (worth retrying) or fatal.
pub trait Retryable {
    /// Whether a retry could plausibly succeed.
    fn is_transient(&self) -> bool;
}

/// Configuration for retry behavior. Loaded once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each attempt after.
    pub base_delay: Duration,
    /// Ceiling on the exponential delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Calculate the deterministic delay for the given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }

    /// Delay for the given attempt with full jitter applied.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_millis = self.jitter.as_millis() as u64;
        let jitter = if jitter_millis == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_millis))
        };
        self.delay_for_attempt(attempt) + jitter
    }
}

/// Failure modes of a retried operation.
///
/// Callers can log exhausted-retries and non-retryable failures differently
/// without re-classifying the underlying error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error; `last` is the final one.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },

    /// The operation failed with an error not worth retrying.
    #[error("non-retryable error: {0}")]
    Fatal(E),
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// The delay before attempt `n + 1` is
/// `min(base_delay * 2^(n-1), max_delay) + random(0, jitter)`. Sleeps are
/// cooperative, so concurrent work on the runtime keeps making progress.
///
/// # Errors
///
/// Returns [`RetryError::Fatal`] as soon as the error classifies as
/// non-transient, or [`RetryError::Exhausted`] once `policy.max_attempts`
/// attempts have all failed.
pub async fn execute<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RetryError::Fatal(err)),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.jittered_delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
