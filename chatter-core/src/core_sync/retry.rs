/*
    retry.rs - Bounded exponential backoff for transient store failures

    Only errors classified as transient are retried; everything else
    fails straight through. The delay doubles per attempt and is capped,
    so an unavailable store costs a bounded amount of latency before the
    caller falls back to the reconciliation pass.
*/

use crate::core_log::LogError;
use crate::core_mirror::MirrorError;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

/// Classifies which failures are worth retrying
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LogError {
    fn is_transient(&self) -> bool {
        LogError::is_transient(self)
    }
}

impl Transient for MirrorError {
    fn is_transient(&self) -> bool {
        MirrorError::is_transient(self)
    }
}

/// Bounded exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt: base * 2^(n-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out
    pub async fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Transient + Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    counter!("chat.sync.retries").increment(1);
                    warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "Transient failure, will retry");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
