//! Bounded exponential-backoff retry for transient transport failures.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry policy: up to `max_retries` extra attempts, sleeping the current
/// delay before each one and doubling it afterwards (pure exponential,
/// capped at `max_delay`, no jitter).
///
/// Only transient errors ([`Error::is_transient`]) are retried; classified
/// domain errors propagate immediately. After exhaustion the last error is
/// wrapped once into [`Error::Api`] if it was not already classified.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Disable retries entirely (single attempt).
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay slept before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(delay).min(self.max_delay)
    }

    /// Run `op` under this policy. `cancel`, when provided, aborts both
    /// backoff sleeps and the in-flight attempt.
    pub async fn run<T, F, Fut>(&self, cancel: Option<&CancellationToken>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(Error::api("request cancelled"));
                }
            }

            let outcome = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(Error::api("request cancelled")),
                    outcome = op() => outcome,
                },
                None => op().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying after backoff"
                    );
                    self.sleep(delay, cancel).await?;
                    attempt += 1;
                }
                // Classified errors propagate unchanged; exhausted
                // transients get wrapped exactly once.
                Err(err) => return Err(err.into_api()),
            }
        }
    }

    async fn sleep(&self, delay: Duration, cancel: Option<&CancellationToken>) -> Result<()> {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(Error::api("request cancelled")),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
