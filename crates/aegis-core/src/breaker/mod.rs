//! Per-backend circuit breaker (spec.md §4.6), generalized from the
//! teacher's `services::circuit_breaker::CircuitBreaker` with a manual
//! force-open/force-close surface and a single-probe half-open gate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use tokio::sync::RwLock;

pub use crate::models::backend::CircuitState;
use crate::models::backend::CircuitBreakerStats;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_duration: Duration::from_secs(30),
        }
    }
}

fn state_from_u8(value: u8) -> CircuitState {
    match value {
        1 => CircuitState::Open,
        2 => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

fn state_to_u8(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

/// State machine for a single backend. `Closed` and `Open` counters use
/// relaxed atomics; state transitions take the async lock only long enough
/// to stamp `last_state_change`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    consecutive_successes: AtomicU64,
    open_count: AtomicU64,
    rejections: AtomicU64,
    opened_at: RwLock<Option<Instant>>,
    last_state_change: RwLock<chrono::DateTime<Utc>>,
    half_open_probe_claimed: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: AtomicU8::new(state_to_u8(CircuitState::Closed)),
            consecutive_failures: AtomicU64::new(0),
            consecutive_successes: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            opened_at: RwLock::new(None),
            last_state_change: RwLock::new(Utc::now()),
            half_open_probe_claimed: AtomicBool::new(false),
        }
    }

    pub fn current_state(&self) -> CircuitState {
        state_from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Whether the proxy may attempt a call right now. Consumes the single
    /// half-open probe slot when transitioning out of `Open`.
    pub async fn allow(&self) -> bool {
        match self.current_state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.read().await.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.open_duration) {
                    self.transition_to_half_open().await;
                    self.half_open_probe_claimed.store(true, Ordering::SeqCst);
                    true
                } else {
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .half_open_probe_claimed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    true
                } else {
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed().await;
                } else {
                    // Admit one more probe; `allow()` only ever lets a single
                    // half-open call through at a time.
                    self.half_open_probe_claimed.store(false, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => self.transition_to_open().await,
            CircuitState::Open => {}
        }
    }

    pub async fn force_open(&self) {
        warn!("circuit breaker {} forced open by operator", self.name);
        self.transition_to_open().await;
    }

    pub async fn force_close(&self) {
        info!("circuit breaker {} forced closed by operator", self.name);
        self.transition_to_closed().await;
    }

    async fn transition_to_open(&self) {
        self.state.store(state_to_u8(CircuitState::Open), Ordering::Relaxed);
        *self.opened_at.write().await = Some(Instant::now());
        *self.last_state_change.write().await = Utc::now();
        self.open_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.half_open_probe_claimed.store(false, Ordering::Relaxed);
        warn!("circuit breaker {} opened", self.name);
    }

    async fn transition_to_half_open(&self) {
        self.state.store(state_to_u8(CircuitState::HalfOpen), Ordering::Relaxed);
        *self.last_state_change.write().await = Utc::now();
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.half_open_probe_claimed.store(false, Ordering::Relaxed);
        info!("circuit breaker {} half-open, probing", self.name);
    }

    async fn transition_to_closed(&self) {
        self.state.store(state_to_u8(CircuitState::Closed), Ordering::Relaxed);
        *self.last_state_change.write().await = Utc::now();
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.half_open_probe_claimed.store(false, Ordering::Relaxed);
        info!("circuit breaker {} closed", self.name);
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.current_state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            last_state_change: *self.last_state_change.read().await,
            open_count: self.open_count.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

/// Owns one [`CircuitBreaker`] per backend, created lazily on first use.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn get_or_insert(&self, backend_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(backend_name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(backend_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(backend_name.to_string(), self.config.clone())))
            .clone()
    }

    pub async fn stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let mut out = HashMap::new();
        for (name, breaker) in self.breakers.read().await.iter() {
            out.insert(name.clone(), breaker.stats().await);
        }
        out
    }

    pub async fn force_open(&self, backend_name: &str) {
        self.get_or_insert(backend_name).await.force_open().await;
    }

    pub async fn force_close(&self, backend_name: &str) {
        self.get_or_insert(backend_name).await.force_close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_duration: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("b".into(), config());
        for _ in 0..3 {
            assert!(breaker.allow().await);
            breaker.record_failure().await;
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow().await);
    }

    #[tokio::test]
    async fn half_open_admits_single_probe_then_closes_on_success() {
        let breaker = CircuitBreaker::new("b".into(), config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(breaker.allow().await);
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert!(!breaker.allow().await, "only one probe admitted");

        breaker.record_success().await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        // Each half-open probe is gated one at a time, same as real traffic:
        // a success that doesn't yet close the breaker must free up the next
        // `allow()` call rather than wedge it shut forever.
        assert!(breaker.allow().await, "a second probe must be admitted after the first success");
        breaker.record_success().await;
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("b".into(), config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(breaker.allow().await);
        breaker.record_failure().await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn force_open_and_force_close_are_immediate() {
        let breaker = CircuitBreaker::new("b".into(), config());
        breaker.force_open().await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
        breaker.force_close().await;
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn registry_creates_breakers_lazily() {
        let registry = CircuitBreakerRegistry::new(config());
        let a = registry.get_or_insert("backend-a").await;
        let b = registry.get_or_insert("backend-a").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().await.len(), 1);
    }
}
