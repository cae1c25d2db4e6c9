//! Backoff and retry scheduling for the registry resolver.
//!
//! The resolver wraps a full pass over the ordered registry list in retry;
//! this crate only knows about delays between attempts, not what an attempt
//! does.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One retry schedule: exponential backoff from `base_delay`, capped at
/// `max_delay`, with additive uniform jitter on top of each computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts beyond the first (`max_retries` in the CLI flag).
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Upper bound of the additive uniform jitter window.
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_max: Duration::from_millis(200),
        }
    }
}

/// Computes the delay before `attempt` (1-based: the delay awaited before
/// the *second* attempt is `calculate_delay(config, 1)`).
///
/// `base * 2^(attempt-1)`, capped at `max_delay`, plus uniform jitter drawn
/// from `[0, jitter_max]`.
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let scaled = config.base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
    let capped = scaled.min(config.max_delay);
    capped + jitter(config.jitter_max)
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis().min(u128::from(u64::MAX)) as u64;
    let drawn = rand::rng().random_range(0..=millis);
    Duration::from_millis(drawn)
}

/// Runs `attempt` up to `config.max_retries + 1` times, sleeping between
/// attempts per [`calculate_delay`]. Returns the last error if every attempt
/// is exhausted.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut attempt: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for n in 1..=(config.max_retries + 1) {
        match attempt(n).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if n <= config.max_retries {
                    tokio::time::sleep(calculate_delay(config, n)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}
