//! Exponential-backoff retry for escrow reads/writes, in the same shape as
//! the reference node workspace's `retry_with_backoff`: bounded attempts,
//! jittered-free fixed exponential growth, and a retryability predicate
//! that lets revert-shaped errors fail fast.

use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
        }
    }
}

pub fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("revert") || lower.contains("execution reverted") {
        return false;
    }
    if lower.contains("network") || lower.contains("timeout") || lower.contains("connection") {
        return true;
    }
    true
}

pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= config.max_attempts || !is_retryable_error(&e.to_string()) => {
                return Err(e);
            }
            Err(_) => {
                sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = ((delay_ms as f64) * config.exponential_base) as u64;
                delay_ms = delay_ms.min(config.max_delay_ms);
            }
        }
    }
}
