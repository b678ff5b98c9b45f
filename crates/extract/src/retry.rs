use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Non-retryable error, returned after the attempt that produced it.
    Permanent(E),
    Exhausted { attempts: usize, last: E },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// `None` retries until cancelled.
    pub max_retries: Option<usize>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(30),
            initial_backoff_ms: 10_000,
            max_backoff_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: Option<usize>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: Option<usize>, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms.max(initial_backoff_ms)),
        }
    }

    /// Same wait before every retry, no attempt limit.
    pub fn fixed(wait: Duration) -> Self {
        Self {
            max_retries: None,
            initial_backoff: wait,
            max_backoff: wait,
        }
    }

    pub fn with_max_retries(mut self, max_retries: Option<usize>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> Option<usize> {
        self.max_retries
    }

    /// Wait before retry number `retry` (1-based), doubling up to the cap.
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }

    fn allows(&self, retry: usize) -> bool {
        self.max_retries.is_none_or(|max| retry <= max)
    }

    /// Run `f` until it succeeds, fails permanently, runs out of retries, or
    /// `cancel` fires. Cancellation interrupts both attempts and waits.
    pub async fn retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = f() => outcome,
            };

            let e = match outcome {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !e.is_retryable() {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed permanently"
                );
                return Err(RetryError::Permanent(e));
            }

            let retry = attempt;
            if !self.allows(retry) {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(RetryError::Exhausted { attempts: attempt, last: e });
            }

            let backoff = self.backoff(retry);
            warn!(
                operation = operation_name,
                attempt = attempt,
                max_retries = ?self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "Operation failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = sleep(backoff) => {}
            }
        }
    }
}
