//! Backend configuration and runtime health/breaker state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static configuration for a backend service sitting behind the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    /// Unique name identifying this backend across the gateway.
    pub name: String,
    /// Base URL, including scheme, e.g. `http://orders-service:8080`.
    pub url: String,
    /// Path patterns this backend serves; see [`crate::router`].
    pub routes: Vec<String>,
    pub health_check_path: String,
    pub health_check_interval_ms: u64,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub weight: u32,
    pub enabled: bool,
}

impl Backend {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("backend name must not be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!(
                "backend url must start with http:// or https://: {}",
                self.url
            ));
        }
        if self.routes.is_empty() {
            return Err(format!("backend {} must declare at least one route", self.name));
        }
        if self.weight == 0 {
            return Err(format!("backend {} weight must be greater than 0", self.name));
        }
        Ok(())
    }
}

/// Health status of a backend as observed by the [`crate::health`] checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Runtime health state maintained per backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_checks: u64,
    pub total_failures: u64,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check: None,
            last_success: None,
            last_error: None,
            response_time_ms: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_checks: 0,
            total_failures: 0,
        }
    }
}

/// State of a per-backend circuit breaker; mirrors [`crate::breaker::CircuitState`]
/// for reporting over the HTTP surface without exposing the breaker itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Reporting snapshot of a circuit breaker's counters, exposed via the
/// `/api/health/circuit-breakers` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
    pub last_state_change: DateTime<Utc>,
    pub open_count: u64,
    pub rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_backend() -> Backend {
        Backend {
            name: "orders".into(),
            url: "http://orders:8080".into(),
            routes: vec!["/api/orders/**".into()],
            health_check_path: "/health".into(),
            health_check_interval_ms: 5_000,
            timeout_ms: 2_000,
            retry_attempts: 2,
            weight: 1,
            enabled: true,
        }
    }

    #[test]
    fn valid_backend_passes() {
        assert!(sample_backend().validate().is_ok());
    }

    #[test]
    fn backend_requires_scheme() {
        let mut b = sample_backend();
        b.url = "orders:8080".into();
        assert!(b.validate().is_err());
    }

    #[test]
    fn backend_requires_routes() {
        let mut b = sample_backend();
        b.routes.clear();
        assert!(b.validate().is_err());
    }
}
