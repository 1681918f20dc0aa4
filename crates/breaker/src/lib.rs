//! Three-state circuit breakers guarding the execution RPC, the escrow
//! contract, and the cache store. Each instance is owned by an explicitly
//! constructed [`BreakerRegistry`] rather than a process-wide singleton.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit open")]
    Open,
    #[error(transparent)]
    Inner(#[from] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
    pub minimum_requests: u32,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            minimum_requests: 10,
            success_threshold: 3,
        }
    }
}

struct Counters {
    failures: AtomicU32,
    successes: AtomicU32,
    total_requests: AtomicU32,
    rejected_requests: AtomicU32,
    window_started_at: AtomicU64,
    last_failure_at: AtomicU64,
    last_state_change_at: AtomicU64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A single named breaker. State lives behind an `RwLock`; counters are
/// plain atomics so outcome recording never blocks a concurrent `call`.
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    state: RwLock<BreakerState>,
    counters: Counters,
    half_open_successes: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct BreakerMetrics {
    pub name: &'static str,
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u32,
    pub rejected_requests: u32,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        let now = now_secs();
        Self {
            name,
            config,
            state: RwLock::new(BreakerState::Closed),
            counters: Counters {
                failures: AtomicU32::new(0),
                successes: AtomicU32::new(0),
                total_requests: AtomicU32::new(0),
                rejected_requests: AtomicU32::new(0),
                window_started_at: AtomicU64::new(now),
                last_failure_at: AtomicU64::new(0),
                last_state_change_at: AtomicU64::new(now),
            },
            half_open_successes: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn state(&self) -> BreakerState {
        self.maybe_transition().await
    }

    pub fn metrics_sync(&self) -> BreakerMetrics {
        BreakerMetrics {
            name: self.name,
            state: *self.state.try_read().expect("breaker lock poisoned or contended"),
            failures: self.counters.failures.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            rejected_requests: self.counters.rejected_requests.load(Ordering::Relaxed),
        }
    }

    async fn maybe_transition(&self) -> BreakerState {
        let now = now_secs();
        let mut state = self.state.write().await;

        match *state {
            BreakerState::Closed => {
                let window_started = self.counters.window_started_at.load(Ordering::Relaxed);
                if now.saturating_sub(window_started) >= self.config.monitoring_period.as_secs() {
                    self.reset_window(now);
                }
            }
            BreakerState::Open => {
                let changed_at = self.counters.last_state_change_at.load(Ordering::Relaxed);
                if now.saturating_sub(changed_at) >= self.config.reset_timeout.as_secs() {
                    *state = BreakerState::HalfOpen;
                    self.half_open_successes.store(0, Ordering::Relaxed);
                    self.counters.last_state_change_at.store(now, Ordering::Relaxed);
                    tracing::info!(breaker = self.name, "circuit half-open");
                }
            }
            BreakerState::HalfOpen => {}
        }

        *state
    }

    fn reset_window(&self, now: u64) {
        self.counters.failures.store(0, Ordering::Relaxed);
        self.counters.successes.store(0, Ordering::Relaxed);
        self.counters.total_requests.store(0, Ordering::Relaxed);
        self.counters.window_started_at.store(now, Ordering::Relaxed);
    }

    /// Runs `f` if the breaker is not Open, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let state = self.maybe_transition().await;
        if state == BreakerState::Open {
            self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
            return Err(BreakerError::Open);
        }

        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        match f().await {
            Ok(v) => {
                self.on_success().await;
                Ok(v)
            }
            Err(e) => {
                self.on_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }

    async fn on_success(&self) {
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        let state = *self.state.read().await;
        if state == BreakerState::HalfOpen {
            let successes = self.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= self.config.success_threshold {
                let mut state = self.state.write().await;
                *state = BreakerState::Closed;
                self.counters.last_state_change_at.store(now_secs(), Ordering::Relaxed);
                self.reset_window(now_secs());
                tracing::info!(breaker = self.name, "circuit closed");
            }
        }
    }

    async fn on_failure(&self) {
        let now = now_secs();
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        self.counters.last_failure_at.store(now, Ordering::Relaxed);

        let state = *self.state.read().await;
        match state {
            BreakerState::HalfOpen => {
                let mut state = self.state.write().await;
                *state = BreakerState::Open;
                self.counters.last_state_change_at.store(now, Ordering::Relaxed);
                tracing::warn!(breaker = self.name, "circuit re-opened from half-open");
            }
            BreakerState::Closed => {
                let failures = self.counters.failures.load(Ordering::Relaxed);
                let total = self.counters.total_requests.load(Ordering::Relaxed);
                if failures >= self.config.failure_threshold && total >= self.config.minimum_requests {
                    let mut state = self.state.write().await;
                    *state = BreakerState::Open;
                    self.counters.last_state_change_at.store(now, Ordering::Relaxed);
                    tracing::warn!(breaker = self.name, failures, total, "circuit opened");
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Owns the three named breakers. Constructed once at the composition root
/// and passed down by `Arc`, never reached through a global.
pub struct BreakerRegistry {
    breakers: HashMap<&'static str, Arc<CircuitBreaker>>,
}

pub const BLOB_EXECUTOR: &str = "blob-executor";
pub const ESCROW_CONTRACT: &str = "escrow-contract";
pub const CACHE_STORE: &str = "cache-store";

impl BreakerRegistry {
    pub fn new() -> Self {
        let mut breakers = HashMap::new();
        for name in [BLOB_EXECUTOR, ESCROW_CONTRACT, CACHE_STORE] {
            breakers.insert(name, Arc::new(CircuitBreaker::new(name, BreakerConfig::default())));
        }
        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unknown breaker: {name}"))
    }

    pub fn all_metrics(&self) -> Vec<BreakerMetrics> {
        let mut metrics: Vec<_> = self.breakers.values().map(|b| b.metrics_sync()).collect();
        metrics.sort_by_key(|m| m.name);
        metrics
    }

    pub fn any_open_sync(&self) -> bool {
        self.breakers
            .values()
            .any(|b| b.metrics_sync().state == BreakerState::Open)
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(0),
            monitoring_period: Duration::from_secs(3600),
            minimum_requests: 2,
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn short_circuits_while_open() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn closes_after_half_open_successes() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        // reset_timeout is zero, so the very next poll flips to half-open.
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                success_threshold: 2,
                ..fast_config()
            },
        );
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        let _ = breaker.call(|| async { Err::<(), _>("still broken") }).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[test]
    fn registry_exposes_all_three_breakers() {
        let registry = BreakerRegistry::new();
        let names: Vec<_> = registry.all_metrics().into_iter().map(|m| m.name).collect();
        assert!(names.contains(&BLOB_EXECUTOR));
        assert!(names.contains(&ESCROW_CONTRACT));
        assert!(names.contains(&CACHE_STORE));
    }
}
