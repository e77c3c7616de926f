use std::future::Future;
use std::time::Duration;

use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};

use crate::error::Error;

/// How often, and how patiently, failed requests are retried. Only errors
/// for which [Error::is_retryable] holds are retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delays between attempts: doubling from `initial_delay`, with jitter,
    /// capped at `max_delay`.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial_millis = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_delay = self.max_delay;
        ExponentialBackoff::from_millis(2)
            .factor(initial_millis.max(2) / 2)
            .max_delay(max_delay)
            .map(jitter)
            .map(move |delay| delay.min(max_delay))
            .take(self.max_retries)
    }

    /// Runs `operation` until it succeeds, fails with an error that is not
    /// retryable, or the retries are used up. A `Retry-After` the server sent
    /// is waited out before the backoff delay, so the next attempt never
    /// comes earlier than the server asked for.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0usize;
        let max_retries = self.max_retries;

        let action = || {
            attempt += 1;
            let current = attempt;
            let fut = operation();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_retryable() && current <= max_retries => {
                        tracing::warn!(
                            request = what,
                            attempt = current,
                            max_retries,
                            error = %err,
                            "request failed, retrying"
                        );
                        let retry_after = err.retry_after();
                        if let Some(wait) = retry_after {
                            tokio::time::sleep(wait).await;
                        }
                        Err(RetryError::Transient { err, retry_after })
                    }
                    Err(err) => Err(RetryError::Permanent(err)),
                }
            }
        };

        Retry::spawn(self.delays(), action).await
    }
}
