/*!
 * Retry with exponential backoff.
 *
 * The policy is plain data and the clock is injected, so the same loop runs
 * against `tokio::time` in production and against a recording clock in tests.
 */

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

/// Backoff policy: `max_attempts` calls in total, waiting
/// `base_delay_ms * multiplier^(n-1)` after the n-th failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, multiplier: f64) -> Self {
        Self { max_attempts, base_delay_ms, multiplier }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1, 0, 1.0)
    }

    /// Delay to wait after `failed_attempt` (1-based) failed
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.round().min(u64::MAX as f64) as u64)
    }
}

/// Source of backoff delays
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Errors that know whether another attempt is worthwhile
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why `retry_with_backoff` gave up
#[derive(Debug)]
pub enum RetryOutcome<E> {
    /// The last error after attempts ran out, or the first non-retryable one
    Failed { error: E, attempts: u32 },
    /// The token fired before or during an attempt or a backoff wait
    Cancelled,
}

/// Run `operation` until it succeeds, fails permanently, exhausts the policy
/// or the token is cancelled. Every call and every backoff wait races the token.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, RetryOutcome<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }

        let result = tokio::select! {
            result = operation(attempt) => result,
            _ = cancel.cancelled() => return Err(RetryOutcome::Cancelled),
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Err(RetryOutcome::Failed { error, attempts: attempt });
        }

        let delay = policy.delay_after(attempt);
        warn!("{} failed (attempt {}/{}): {} - retrying in {:?}", label, attempt, max_attempts, error, delay);

        tokio::select! {
            _ = clock.sleep(delay) => {},
            _ = cancel.cancelled() => return Err(RetryOutcome::Cancelled),
        }
        attempt += 1;
    }
}
