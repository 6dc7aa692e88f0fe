//! Bounded exponential backoff for idempotent backend calls.
//!
//! Only embedding batches and index upload batches go through here; both can be replayed
//! without side effects. The delay before retry `n` (1-based) is `base^n` seconds; a base
//! below one never shrinks the delay past the first `base` seconds.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Retry budget and backoff curve shared by the embedder and the index manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Backoff base in seconds.
    pub base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: 2.0,
        }
    }
}

/// Terminal result of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable; returned on the attempt that produced it.
    Fatal(E),
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },
}

impl RetryPolicy {
    /// Build a policy from explicit retry count and base.
    pub fn new(max_retries: u32, base: f64) -> Self {
        Self { max_retries, base }
    }

    /// Delay slept before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.base * f64::from(self.factor()).powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }

    fn factor(&self) -> f32 {
        (self.base as f32).max(1.0)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.delay_for(1))
            .with_factor(self.factor())
            .without_max_delay()
            .with_max_times(self.max_retries as usize)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the budget is
    /// spent. `label` only feeds the log lines.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = AtomicU32::new(0);
        let result = (|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            operation()
        })
        .retry(self.backoff())
        .when(|error| is_retryable(error))
        .notify(|error, delay| {
            tracing::warn!(
                operation = label,
                attempt = attempts.load(Ordering::Relaxed),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure; backing off"
            );
        })
        .await;

        result.map_err(|error| {
            if !is_retryable(&error) {
                return RetryError::Fatal(error);
            }
            let attempts = attempts.load(Ordering::Relaxed);
            tracing::error!(
                operation = label,
                attempts,
                error = %error,
                "Retry budget exhausted"
            );
            RetryError::Exhausted {
                attempts,
                last: error,
            }
        })
    }
}
