//! Bounded retries with blocking sleeps.

use std::thread;
use std::time::Duration;

use crate::error::{DeployError, DeployResult};

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `attempt * step` after the given failed attempt.
    Linear,
    /// Wait `step` after every failed attempt.
    Fixed,
}

impl RetryPolicy {
    #[must_use]
    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            step,
            backoff: Backoff::Linear,
        }
    }

    #[must_use]
    pub const fn fixed(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            step,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay after failed attempt number `attempt` (1-indexed).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.step * attempt,
            Backoff::Fixed => self.step,
        }
    }
}

/// Run `operation` until it succeeds or the attempts run out.
///
/// The operation receives the 1-indexed attempt number. When every
/// attempt fails the last error is returned inside
/// [`DeployError::RetriesExhausted`].
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut operation: F) -> DeployResult<T>
where
    F: FnMut(u32) -> DeployResult<T>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < policy.max_attempts {
                    let delay = policy.delay_after(attempt);
                    log::warn!(
                        "{label}: attempt {attempt}/{} failed: {e}. Retrying in {}s...",
                        policy.max_attempts,
                        delay.as_secs()
                    );
                    thread::sleep(delay);
                } else {
                    log::warn!(
                        "{label}: attempt {attempt}/{} failed: {e}",
                        policy.max_attempts
                    );
                }
                last_error = Some(e);
            }
        }
    }

    Err(DeployError::RetriesExhausted {
        operation: label.to_string(),
        attempts: policy.max_attempts,
        last: Box::new(
            last_error.unwrap_or_else(|| DeployError::Other("no attempts were made".into())),
        ),
    })
}
