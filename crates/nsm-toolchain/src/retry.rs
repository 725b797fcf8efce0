//! Retry for transient toolchain failures.
//!
//! Only errors for which [`ToolchainError::is_transient`] holds are retried.
//! Delays grow exponentially from `initial_backoff`, are capped at
//! `max_backoff`, and are scaled by a random factor in
//! `[1 - jitter, 1 + jitter]`.

use crate::ToolchainError;
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// `what` names the operation in logs and in the final
/// [`ToolchainError::RetriesExhausted`].
pub fn run_with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ToolchainError>
where
    F: FnMut() -> Result<T, ToolchainError>,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                if attempt == 0 {
                    return Err(e);
                }
                return Err(ToolchainError::RetriesExhausted {
                    command: what.to_owned(),
                    attempts: attempt + 1,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = apply_jitter(policy.backoff_for(attempt), policy.jitter);
                attempt += 1;
                warn!(
                    "{what} failed ({e}); retry {attempt}/{} in {delay:?}",
                    policy.max_retries
                );
                thread::sleep(delay);
            }
        }
    }
}
