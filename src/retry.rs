//! Retry supervision for remote calls that must eventually succeed.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Spacing between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed(Duration),
    /// Delay grows with the attempt number: `attempt * unit`
    Linear(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(unit) => unit * attempt,
        }
    }
}

/// Errors that can tell whether another attempt makes sense
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::api::ApiError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Returned when every attempt failed or a failure was not retryable
#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: Display> {
    pub label: String,
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds, the error is not retryable, or the policy is
/// exhausted. `on_failure` sees every failed attempt (1-based) before the
/// backoff sleep.
pub async fn retry<T, E, F, Fut, N>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    mut on_failure: N,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(u32, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        on_failure(attempt, &error);

        if !error.is_retryable() || attempt >= max_attempts {
            tracing::warn!("{} giving up after attempt {}: {}", label, attempt, error);
            return Err(RetryError {
                label: label.to_string(),
                attempts: attempt,
                last: error,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            "{} attempt {}/{} failed: {}. Retrying in {:?}",
            label,
            attempt,
            max_attempts,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}
