//! Retry policy for deferred store writes.

use std::future::Future;
use std::time::Duration;

use crate::config::CounterConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::store::DataStoreError;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CounterConfig::default())
    }
}

impl From<&CounterConfig> for RetryPolicy {
    fn from(config: &CounterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure may go away on its own.
    pub fn is_retryable(error: &DataStoreError) -> bool {
        match error {
            DataStoreError::Unavailable(_) | DataStoreError::Timeout(_) | DataStoreError::Io(_) => {
                true
            }
            DataStoreError::Corrupt { .. }
            | DataStoreError::RowNotFound { .. }
            | DataStoreError::Snapshot(_) => false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay_ms, self.max_delay_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the last error together with the number of attempts made.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, (DataStoreError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DataStoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && Self::is_retryable(&e) => {
                    let delay = self.delay(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying store write");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}
