//! Bounded retry with exponential backoff for mirror calls

use std::time::Duration;
use tracing::warn;
use vitalchain_core::RetryConfig;
use vitalchain_mirror::MirrorResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying only `MirrorError::Unavailable`.
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> MirrorResult<T>) -> MirrorResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_retry(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Mirror call failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
