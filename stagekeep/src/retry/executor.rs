//! Retry execution loop with failure classification and attempt observers.

use crate::errors::ClassifyFailure;
use crate::retry::policy::RetryPolicy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Terminal outcome of a retry loop that never produced a success.
///
/// Carries the final underlying error plus the attempt count so callers can
/// build their own reporting without re-deriving loop state.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt was made and the last one still failed.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        /// The error from the final attempt.
        source: E,
        /// Total attempts made.
        attempts: usize,
    },

    /// The failure kind was not retryable, so the loop stopped early.
    #[error("not retryable (after {attempts} attempts): {source}")]
    Aborted {
        /// The error that stopped the loop.
        source: E,
        /// Total attempts made.
        attempts: usize,
    },
}

impl<E> RetryError<E> {
    /// Total attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } | Self::Aborted { attempts, .. } => *attempts,
        }
    }

    /// Consumes the wrapper, returning the underlying error.
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::Aborted { source, .. } => source,
        }
    }
}

impl<E: ClassifyFailure> ClassifyFailure for RetryError<E> {
    fn failure_kind(&self) -> crate::errors::FailureKind {
        match self {
            Self::Exhausted { source, .. } | Self::Aborted { source, .. } => {
                source.failure_kind()
            }
        }
    }
}

/// Executes an operation with retry logic.
///
/// The operation is invoked up to `policy.max_attempts` times. After a
/// failure whose [`FailureKind`](crate::errors::FailureKind) is in the
/// policy's retryable set, the loop sleeps for the jittered backoff delay
/// and tries again; any other failure aborts immediately.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: ClassifyFailure + std::fmt::Display,
{
    with_retry_observed(policy, |_: &E, _: usize| {}, operation).await
}

/// Executes an operation with retry logic, reporting each failed attempt to
/// an observer.
///
/// The observer receives the error and the 1-indexed attempt number,
/// including the final failing attempt. A panicking observer is contained
/// and logged; it never aborts the loop.
pub async fn with_retry_observed<T, E, O, F, Fut>(
    policy: &RetryPolicy,
    mut observer: O,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    O: FnMut(&E, usize),
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: ClassifyFailure + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if catch_unwind(AssertUnwindSafe(|| observer(&e, attempt))).is_err() {
                    tracing::warn!(attempt, "Attempt observer panicked; continuing");
                }

                let kind = e.failure_kind();
                if !policy.should_retry(kind) {
                    tracing::debug!(
                        attempt,
                        kind = %kind,
                        error = %e,
                        "Failure is not retryable"
                    );
                    return Err(RetryError::Aborted {
                        source: e,
                        attempts: attempt,
                    });
                }

                if attempt >= max_attempts {
                    tracing::warn!(
                        attempts = attempt,
                        kind = %kind,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        source: e,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
