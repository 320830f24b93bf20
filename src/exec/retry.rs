// src/exec/retry.rs

//! Retry and timeout policy shared by the DAG runtime and the worker queue.
//!
//! A unit of work is retried up to `max_retries` times. Each attempt may be
//! bounded by a timeout; a timed-out attempt counts as a failed attempt and
//! is retried like any other failure. Between attempts the policy waits
//! `base * 2^k` (k = 0 for the first retry), capped at `max`.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::exec::cancel::CancelSignal;

/// Error types the policy can drive.
pub trait Retryable: Sized {
    /// The error recorded for an attempt that hit the timeout.
    fn timed_out(after: Duration) -> Self;

    /// `false` ends the retry loop immediately (e.g. the attempt was
    /// cancelled).
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No waiting between attempts.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10))
    }
}

/// Per-unit retry/timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Option<Duration>,
    pub backoff: Backoff,
}

/// Handed to the `on_retry` hook before each backoff wait.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a E,
}

/// Final result of [`RetryPolicy::run`].
#[derive(Debug, Clone)]
pub struct RetryOutcome<T, E> {
    /// Attempts actually made, including the first.
    pub attempts: u32,
    /// Result of the last attempt.
    pub result: Result<T, E>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Single attempt, no timeout.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `attempt` until it succeeds, the budget is exhausted, the error is
    /// not retryable, or `cancel` asks for termination.
    ///
    /// `attempt` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, N>(
        &self,
        cancel: &CancelSignal,
        mut on_retry: N,
        mut attempt: F,
    ) -> RetryOutcome<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(RetryNotice<'_, E>),
    {
        let max_attempts = self.max_attempts();
        let mut n = 0;

        loop {
            n += 1;

            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt(n)).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(attempt = n, timeout_ms = limit.as_millis() as u64, "attempt timed out");
                        Err(E::timed_out(limit))
                    }
                },
                None => attempt(n).await,
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        attempts: n,
                        result: Ok(value),
                    };
                }
                Err(e) => e,
            };

            if n >= max_attempts || !error.is_retryable() || cancel.is_terminate_requested() {
                return RetryOutcome {
                    attempts: n,
                    result: Err(error),
                };
            }

            let delay = self.backoff.delay_for(n - 1);
            on_retry(RetryNotice {
                attempt: n,
                delay,
                error: &error,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.terminated() => {
                    debug!(attempt = n, "cancelled during backoff; giving up");
                    return RetryOutcome {
                        attempts: n,
                        result: Err(error),
                    };
                }
            }
        }
    }
}
