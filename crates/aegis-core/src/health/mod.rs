//! Periodic backend health checking (spec.md §4.5).
//!
//! Each enabled backend gets its own timer-driven probe. The probe itself is
//! abstracted behind [`HealthProbe`] so the state-transition logic can be
//! unit tested without a live HTTP server, the same way [`crate::kv`]
//! abstracts the rate-limit store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};

use crate::models::backend::{Backend, HealthStatus, ServiceHealth};
use crate::models::metrics::BackendMetric;

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Issues a single health probe against a backend. Implemented by
/// [`ReqwestProbe`] in production and by in-memory fakes in tests.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, backend: &Backend) -> ProbeOutcome;
}

/// Production prober: `GET {backend.url}{backend.health_check_path}` with
/// `backend.timeout_ms`. A non-2xx/3xx status or a transport error both
/// count as failure, matching the "error or status ≥ 500" rule at the
/// checker layer (the distinction only matters for circuit breaker wiring,
/// not for health status itself).
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for ReqwestProbe {
    async fn probe(&self, backend: &Backend) -> ProbeOutcome {
        let url = format!("{}{}", backend.url, backend.health_check_path);
        let started = Instant::now();
        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(backend.timeout_ms))
            .send()
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().as_u16() < 500 => ProbeOutcome {
                success: true,
                response_time_ms,
                error: None,
            },
            Ok(response) => ProbeOutcome {
                success: false,
                response_time_ms,
                error: Some(format!("status {}", response.status())),
            },
            Err(e) => ProbeOutcome {
                success: false,
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthCheckerConfig {
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            success_threshold: 2,
            failure_threshold: 3,
        }
    }
}

/// Owns the live [`ServiceHealth`] snapshot for every configured backend.
pub struct HealthChecker {
    backends: Vec<Backend>,
    prober: Box<dyn HealthProbe>,
    config: HealthCheckerConfig,
    health: RwLock<HashMap<String, ServiceHealth>>,
}

impl HealthChecker {
    pub fn new(backends: Vec<Backend>, prober: Box<dyn HealthProbe>, config: HealthCheckerConfig) -> Self {
        let mut health = HashMap::with_capacity(backends.len());
        for backend in &backends {
            health.insert(backend.name.clone(), ServiceHealth::default());
        }
        Self {
            backends,
            prober,
            config,
            health: RwLock::new(health),
        }
    }

    pub fn snapshot(&self, backend_name: &str) -> Option<ServiceHealth> {
        self.health.read().unwrap().get(backend_name).cloned()
    }

    pub fn all(&self) -> HashMap<String, ServiceHealth> {
        self.health.read().unwrap().clone()
    }

    /// Issues one probe for `backend`, updates its recorded state, and
    /// returns the metric record for persistence.
    pub async fn probe_backend(&self, backend: &Backend) -> BackendMetric {
        let outcome = self.prober.probe(backend).await;
        let now = Utc::now();

        let mut health = self.health.write().unwrap();
        let entry = health.entry(backend.name.clone()).or_default();
        entry.last_check = Some(now);
        entry.response_time_ms = Some(outcome.response_time_ms);
        entry.total_checks += 1;

        if outcome.success {
            entry.consecutive_successes += 1;
            entry.consecutive_failures = 0;
            entry.last_success = Some(now);
            entry.last_error = None;
            if entry.consecutive_successes >= self.config.success_threshold {
                entry.status = HealthStatus::Healthy;
            } else if entry.status != HealthStatus::Healthy {
                entry.status = HealthStatus::Degraded;
            }
        } else {
            entry.consecutive_failures += 1;
            entry.consecutive_successes = 0;
            entry.last_error = outcome.error.clone();
            entry.total_failures += 1;
            if entry.consecutive_failures >= self.config.failure_threshold {
                if entry.status != HealthStatus::Unhealthy {
                    warn!("backend {} marked unhealthy after {} consecutive failures", backend.name, entry.consecutive_failures);
                }
                entry.status = HealthStatus::Unhealthy;
            } else {
                entry.status = HealthStatus::Degraded;
            }
        }

        BackendMetric {
            timestamp: now,
            backend: backend.name.clone(),
            healthy: outcome.success,
            response_time_ms: Some(outcome.response_time_ms),
            consecutive_failures: entry.consecutive_failures,
            consecutive_successes: entry.consecutive_successes,
        }
    }

    /// Manually triggers one off-schedule probe for a named backend.
    pub async fn trigger(&self, backend_name: &str) -> Option<BackendMetric> {
        let backend = self.backends.iter().find(|b| b.name == backend_name)?.clone();
        Some(self.probe_backend(&backend).await)
    }

    /// Runs the periodic probe loop for every enabled backend, each on its
    /// own `health_check_interval_ms` timer, until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut tickers: Vec<(usize, tokio::time::Interval)> = self
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.enabled)
            .map(|(i, b)| (i, tokio::time::interval(Duration::from_millis(b.health_check_interval_ms))))
            .collect();

        loop {
            if tickers.is_empty() {
                // No enabled backends; just wait for shutdown.
                let _ = shutdown.recv().await;
                return;
            }
            let ticks: Vec<Pin<Box<dyn Future<Output = usize> + Send + '_>>> = tickers
                .iter_mut()
                .map(|(i, interval)| {
                    let i = *i;
                    Box::pin(async move {
                        interval.tick().await;
                        i
                    }) as Pin<Box<dyn Future<Output = usize> + Send + '_>>
                })
                .collect();
            tokio::select! {
                idx = futures_util::future::select_all(ticks) => {
                    let (backend_index, _, _) = idx;
                    let backend = &self.backends[backend_index];
                    debug!("probing backend {}", backend.name);
                    self.probe_backend(backend).await;
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedProbe {
        succeed: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        async fn probe(&self, _backend: &Backend) -> ProbeOutcome {
            ProbeOutcome {
                success: self.succeed.load(Ordering::SeqCst),
                response_time_ms: 5,
                error: if self.succeed.load(Ordering::SeqCst) {
                    None
                } else {
                    Some("connection refused".to_string())
                },
            }
        }
    }

    fn backend() -> Backend {
        Backend {
            name: "orders".to_string(),
            url: "http://orders:8080".to_string(),
            routes: vec!["/api/orders".to_string()],
            health_check_path: "/health".to_string(),
            health_check_interval_ms: 5_000,
            timeout_ms: 1_000,
            retry_attempts: 1,
            weight: 1,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn becomes_unhealthy_after_failure_threshold() {
        let prober = Box::new(FixedProbe {
            succeed: AtomicBool::new(false),
        });
        let checker = HealthChecker::new(
            vec![backend()],
            prober,
            HealthCheckerConfig {
                success_threshold: 2,
                failure_threshold: 2,
            },
        );
        checker.probe_backend(&backend()).await;
        assert_eq!(checker.snapshot("orders").unwrap().status, HealthStatus::Degraded);
        checker.probe_backend(&backend()).await;
        assert_eq!(checker.snapshot("orders").unwrap().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn recovers_to_healthy_after_success_threshold() {
        let prober = Box::new(FixedProbe {
            succeed: AtomicBool::new(true),
        });
        let checker = HealthChecker::new(
            vec![backend()],
            prober,
            HealthCheckerConfig {
                success_threshold: 2,
                failure_threshold: 2,
            },
        );
        checker.probe_backend(&backend()).await;
        checker.probe_backend(&backend()).await;
        assert_eq!(checker.snapshot("orders").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn manual_trigger_probes_unknown_backend_returns_none() {
        let prober = Box::new(FixedProbe {
            succeed: AtomicBool::new(true),
        });
        let checker = HealthChecker::new(vec![backend()], prober, HealthCheckerConfig::default());
        assert!(checker.trigger("missing").await.is_none());
        assert!(checker.trigger("orders").await.is_some());
    }
}
