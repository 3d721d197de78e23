//! End-to-end proxy pipeline test: a backend that refuses every connection
//! should trip its circuit breaker after `failure_threshold` failures, after
//! which further requests fail fast with 503 instead of waiting out another
//! connection timeout. Mirrors the teacher's
//! `circuit_breaker_integration_test.rs`, generalized from its flat
//! `RouteHandler` to AEGIS's `Router`/`RateLimiter`/`CircuitBreakerRegistry`
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aegis_core::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use aegis_core::health::{HealthChecker, HealthCheckerConfig, HealthProbe, ProbeOutcome};
use aegis_core::kv::{KvError, KvStore, LimitOutcome};
use aegis_core::metrics::{CollectorConfig, MetricsCollector};
use aegis_core::models::backend::Backend;
use aegis_core::models::metrics::{BackendMetric, RateLimitMetric, RequestMetric};
use aegis_core::proxy::ProxyPipeline;
use aegis_core::ratelimit::rules::{BypassConfig, KeyStrategy};
use aegis_core::ratelimit::{RateLimiter, TierResolver};
use aegis_core::router::Router;
use aegis_core::tsdb::{EndpointStats, LatencyPercentiles, Overview, SeriesPoint, StoreError, TimeSeriesStore};

/// Always allows, with ample remaining budget: the rate limiter is not
/// under test here.
struct AlwaysAllowKv;

#[async_trait]
impl KvStore for AlwaysAllowKv {
    async fn eval_token_bucket(&self, _: &str, _: f64, _: f64, _: f64, _: i64, _: i64) -> Result<LimitOutcome, KvError> {
        Ok(allow())
    }

    async fn eval_sliding_window_log(&self, _: &str, _: u64, _: i64, _: u64, _: i64, _: &str) -> Result<LimitOutcome, KvError> {
        Ok(allow())
    }

    async fn eval_sliding_window_counter(&self, _: &str, _: u64, _: i64, _: u64, _: i64) -> Result<LimitOutcome, KvError> {
        Ok(allow())
    }

    async fn eval_fixed_window(&self, _: &str, _: u64, _: i64, _: u64, _: i64) -> Result<LimitOutcome, KvError> {
        Ok(allow())
    }

    async fn delete(&self, _: &str) -> Result<(), KvError> {
        Ok(())
    }
}

fn allow() -> LimitOutcome {
    LimitOutcome {
        allowed: true,
        remaining: 1_000,
        limit: 1_000,
        reset_at_ms: 0,
    }
}

/// Discards everything; the collector's background flush task needs a
/// store to flush into, but no test here queries it back.
struct DiscardingStore;

#[async_trait]
impl TimeSeriesStore for DiscardingStore {
    async fn insert_request_metrics(&self, _: &[RequestMetric]) -> Result<(), StoreError> {
        Ok(())
    }
    async fn insert_rate_limit_metrics(&self, _: &[RateLimitMetric]) -> Result<(), StoreError> {
        Ok(())
    }
    async fn insert_backend_metrics(&self, _: &[BackendMetric]) -> Result<(), StoreError> {
        Ok(())
    }
    async fn overview(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Overview, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn request_rate(&self, _: DateTime<Utc>, _: DateTime<Utc>, _: chrono::Duration) -> Result<Vec<SeriesPoint>, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn latency_percentiles(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<LatencyPercentiles, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn error_rate(&self, _: DateTime<Utc>, _: DateTime<Utc>, _: chrono::Duration) -> Result<Vec<SeriesPoint>, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn status_distribution(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<(u16, i64)>, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn top_endpoints(&self, _: DateTime<Utc>, _: DateTime<Utc>, _: u32) -> Result<Vec<EndpointStats>, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn endpoint_metrics(
        &self,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
        _: Option<&str>,
        _: Option<&str>,
    ) -> Result<Vec<EndpointStats>, StoreError> {
        unimplemented!("not exercised by this test")
    }
    async fn metric_value(&self, _: &str, _: u64, _: Option<&str>, _: Option<&str>, _: DateTime<Utc>) -> Result<f64, StoreError> {
        unimplemented!("not exercised by this test")
    }
}

/// Every probe succeeds; the health checker is not under test, only the
/// circuit breaker's response to upstream connection failures.
struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self, _backend: &Backend) -> ProbeOutcome {
        ProbeOutcome {
            success: true,
            response_time_ms: 1,
            error: None,
        }
    }
}

fn test_backend() -> Backend {
    Backend {
        name: "orders".to_string(),
        url: "http://127.0.0.1:1".to_string(),
        routes: vec!["/api/orders/*".to_string()],
        health_check_path: "/health".to_string(),
        health_check_interval_ms: 30_000,
        timeout_ms: 200,
        retry_attempts: 0,
        weight: 1,
        enabled: true,
    }
}

async fn build_pipeline() -> ProxyPipeline {
    let backend = test_backend();
    let router = Router::new(vec![backend.clone()]).expect("valid backend configuration");
    let limiter = RateLimiter::new(
        Arc::new(AlwaysAllowKv),
        Vec::new(),
        BypassConfig::default(),
        TierResolver::default(),
        KeyStrategy::default(),
    );
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_duration: Duration::from_secs(30),
    }));
    let health = Arc::new(HealthChecker::new(vec![backend], Box::new(AlwaysHealthy), HealthCheckerConfig::default()));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let collector = MetricsCollector::spawn(
        Arc::new(DiscardingStore),
        CollectorConfig {
            flush_interval_ms: 60_000,
            batch_size: 100,
            sample_rate: 1.0,
        },
        shutdown_rx,
    );

    ProxyPipeline::new(router, limiter, breakers, health, collector)
}

#[actix_web::test]
async fn circuit_breaker_trips_after_repeated_connection_failures() {
    let pipeline = Arc::new(build_pipeline().await);

    let app = test::init_service(App::new().default_service(web::route().to({
        let pipeline = pipeline.clone();
        move |req, body| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(req, body).await }
        }
    })))
    .await;

    // The backend at 127.0.0.1:1 refuses every connection. The first three
    // requests each record a breaker failure (upstream connect error -> 502);
    // the fourth finds the breaker open and fails fast with 503.
    for attempt in 1..=3 {
        let req = test::TestRequest::get().uri("/api/orders/1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 502, "attempt {attempt} should be an upstream error");
    }

    let req = test::TestRequest::get().uri("/api/orders/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503, "circuit should be open after the failure threshold");
}

#[actix_web::test]
async fn unmatched_route_returns_404() {
    let pipeline = Arc::new(build_pipeline().await);

    let app = test::init_service(App::new().default_service(web::route().to({
        let pipeline = pipeline.clone();
        move |req, body| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(req, body).await }
        }
    })))
    .await;

    let req = test::TestRequest::get().uri("/no/such/route").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
