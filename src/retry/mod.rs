//! Retry with a fixed idle delay.
//!
//! Two flavors share one policy type: [`retry_blocking`] parks the thread
//! between attempts and is meant for the synchronous producer, while
//! [`retry_async`] yields to the tokio scheduler and is the only one that may
//! be used from polling tasks.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Idle time after a failed attempt.
    pub delay: Duration,
    /// Random pre-delay before every attempt, drawn from `[min, max)`.
    pub jitter: Option<(Duration, Duration)>,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
            jitter: None,
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter = Some((min, max));
        self
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempt >= max)
    }

    fn pre_delay(&self) -> Option<Duration> {
        let (min, max) = self.jitter?;
        if max <= min {
            return Some(min);
        }
        let millis = rand::thread_rng().gen_range(min.as_millis() as u64..max.as_millis() as u64);
        Some(Duration::from_millis(millis))
    }
}

/// Run `op` until it succeeds or the policy is exhausted, sleeping
/// cooperatively between attempts. Returns the last error on exhaustion.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        if let Some(pause) = policy.pre_delay() {
            tokio::time::sleep(pause).await;
        }
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if policy.exhausted(attempt) {
                    warn!(op = label, attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                warn!(op = label, attempt, error = %e, "retrying");
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
}

/// Blocking twin of [`retry_async`]. Never call this from an async task.
pub fn retry_blocking<T, E, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        if let Some(pause) = policy.pre_delay() {
            std::thread::sleep(pause);
        }
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if policy.exhausted(attempt) {
                    warn!(op = label, attempt, error = %e, "retries exhausted");
                    return Err(e);
                }
                warn!(op = label, attempt, error = %e, "retrying");
            }
        }
        std::thread::sleep(policy.delay);
    }
}
