//! Fixed-schedule retry policy for git subprocess operations.

use std::future::Future;
use std::time::Duration;

/// Delays slept before each retry of a failing git operation.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Retry policy: one initial attempt plus one retry per configured delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

impl RetryPolicy {
    /// Create a policy from an explicit delay schedule.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Delay slept after the given failed attempt (1-based), if another attempt follows.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        attempt.checked_sub(1).and_then(|i| self.delays.get(i).copied())
    }

    /// Run `operation` until it succeeds, `should_retry` rejects the error,
    /// or the schedule is exhausted.
    pub async fn execute<F, Fut, T, E, R>(
        &self,
        label: &str,
        mut operation: F,
        should_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let delay = match self.delay_for_attempt(attempt) {
                        Some(delay) if should_retry(&e) => delay,
                        _ => {
                            if attempt > 1 {
                                tracing::warn!(
                                    operation = label,
                                    attempt,
                                    max_attempts = self.max_attempts(),
                                    error = %e,
                                    "Retry exhausted"
                                );
                            }
                            return Err(e);
                        }
                    };

                    tracing::warn!(
                        operation = label,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Retrying after delay"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
