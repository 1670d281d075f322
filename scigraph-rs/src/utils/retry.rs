//! Bounded exponential-backoff retry.
//!
//! Only errors for which [`ScigraphError::is_transient`] holds are retried;
//! everything else fails on the first attempt.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::errors::ScigraphError;

/// How many times, and how patiently, to retry a fallible operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }
}

/// The last error of an operation that did not succeed, with the number of
/// attempts made.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: usize,
    pub error: ScigraphError,
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// A policy with millisecond intervals, for tests and dry runs.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicUsize::new(0);
        let max_attempts = self.max_retries + 1;

        let outcome = backoff::future::retry(backoff, || {
            let fut = op();
            let attempts = &attempts;
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && attempt < max_attempts => {
                        warn!(operation = label, attempt, error = %e, "transient failure, retrying");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await;

        outcome.map_err(|error| Exhausted {
            attempts: attempts.load(Ordering::SeqCst),
            error,
        })
    }
}
