//! Exponential backoff with jitter for provider calls.
//!
//! Only errors that [`TrainsyncError::is_retryable`] accepts are retried;
//! a 4xx from the provider fails immediately.

use crate::config::NetworkConfig;
use crate::{Result, TrainsyncError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff settings for one kind of call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed): doubling, capped,
    /// then scaled by a random factor in `0.5..1.5` when jitter is on.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = doubled.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} attempts", what, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}",
                    what,
                    attempt + 1,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("{} failed after {} attempts: {}", what, attempt + 1, e);
                }
                return Err(e);
            }
        }
    }
}

/// Shorthand for the error a retry loop gives up with on a 5xx.
pub(crate) fn provider_error(status_code: u16, message: impl Into<String>) -> TrainsyncError {
    TrainsyncError::Provider {
        status_code: Some(status_code),
        message: message.into(),
    }
}
