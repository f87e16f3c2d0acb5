//! Exponential backoff for throttled batch calls.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::store::StoreError;

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Retry policy for batch store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Policy from engine settings.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (zero-based), with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base_ms)
        };
        exp.saturating_add(Duration::from_millis(jitter))
            .min(MAX_BACKOFF)
    }

    /// Sleep before retry number `attempt`.
    pub fn backoff(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Run `call`, retrying retryable store errors until the policy is spent.
    pub fn run<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    warn!(operation, attempt, error = %err, "retrying store call");
                    self.backoff(attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Resubmit unprocessed batch work until none is left.
    ///
    /// `call` returns the part of its input the store did not process.
    /// Rounds without progress back off; after `max_retries` of them in a
    /// row the batch fails with [`StoreError::Unprocessed`].
    pub fn drain<K>(
        &self,
        operation: &'static str,
        work: Vec<K>,
        mut call: impl FnMut(&[K]) -> Result<Vec<K>, StoreError>,
    ) -> Result<(), StoreError> {
        let mut pending = work;
        let mut stalled = 0;
        while !pending.is_empty() {
            let unprocessed = self.run(operation, || call(&pending))?;
            if !unprocessed.is_empty() {
                debug!(
                    operation,
                    unprocessed = unprocessed.len(),
                    "resubmitting unprocessed requests"
                );
                if unprocessed.len() < pending.len() {
                    stalled = 0;
                } else if stalled >= self.max_retries {
                    return Err(StoreError::Unprocessed {
                        operation,
                        remaining: unprocessed.len(),
                    });
                } else {
                    self.backoff(stalled);
                    stalled += 1;
                }
            }
            pending = unprocessed;
        }
        Ok(())
    }
}
