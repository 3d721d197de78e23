//! Per-request proxy pipeline (spec.md §4.7), generalized from the teacher's
//! `services::http::RouteHandler::handle_request`: rate limiting, route
//! resolution, circuit-breaker-gated forwarding with retries, and metrics
//! recording, all driven off one [`RequestContext`] built at the edge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::http::{Method as ActixMethod, StatusCode};
use actix_web::{web, Error as ActixError, HttpRequest, HttpResponse, ResponseError};
use chrono::Utc;
use log::warn;
use reqwest::{
    header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue},
    Client, Method as ReqwestMethod,
};
use tokio::time::{sleep, timeout};

use crate::breaker::CircuitBreakerRegistry;
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::ml::MlAggregator;
use crate::models::backend::{Backend, HealthStatus};
use crate::models::context::{Headers, RequestContext, Tier};
use crate::models::error::GatewayError;
use crate::models::metrics::{RateLimitMetric, RequestMetric};
use crate::ratelimit::RateLimiter;
use crate::router::Router;

const SKIP_REQUEST_HEADERS: &[&str] = &["host", "connection", "upgrade", "proxy-connection"];
const MIN_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 2_000;

/// Ties route resolution, rate limiting, circuit breaking and metrics
/// together into the single entry point the gateway's catch-all handler
/// calls for every proxied request. Cheap to clone-by-`Arc`; share one
/// instance across the whole Actix worker pool.
pub struct ProxyPipeline {
    client: Client,
    router: Router,
    limiter: RateLimiter,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthChecker>,
    metrics: MetricsCollector,
    ml: Option<Arc<MlAggregator>>,
}

impl ProxyPipeline {
    pub fn new(
        router: Router,
        limiter: RateLimiter,
        breakers: Arc<CircuitBreakerRegistry>,
        health: Arc<HealthChecker>,
        metrics: MetricsCollector,
    ) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to build upstream HTTP client");
        Self {
            client,
            router,
            limiter,
            breakers,
            health,
            metrics,
            ml: None,
        }
    }

    /// Feeds every request into the ML aggregator's per-minute buckets, for
    /// later forwarding to the remote anomaly-detection service. Absent by
    /// default; only set when `ML_SERVICE_ENABLED` is configured.
    pub fn with_ml(mut self, ml: Arc<MlAggregator>) -> Self {
        self.ml = Some(ml);
        self
    }

    /// Handles one proxied request end to end. Always records exactly one
    /// [`RequestMetric`], whether the outcome was a forwarded response or a
    /// rejection at any pipeline stage.
    pub async fn handle(&self, req: HttpRequest, body: web::Bytes) -> Result<HttpResponse, ActixError> {
        let start = Instant::now();
        let ctx = build_context(&req);
        self.metrics.increment_active_connections();

        let outcome = self.handle_internal(&ctx, &req, body).await;

        self.metrics.decrement_active_connections();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (response, status_code, backend, rate_limited, error_message) = match outcome {
            Ok((response, backend)) => {
                let status_code = response.status().as_u16();
                (Ok(response), status_code, backend, false, None)
            }
            Err(err) => {
                let status_code = err.error_response().status().as_u16();
                let rate_limited = matches!(err, GatewayError::RateLimited { .. });
                let message = err.to_string();
                (Err(err), status_code, None, rate_limited, Some(message))
            }
        };

        self.metrics.record_request(RequestMetric {
            timestamp: Utc::now(),
            request_id: ctx.request_id.clone(),
            path: ctx.path.clone(),
            method: ctx.method.clone(),
            status_code,
            duration_ms,
            user_id: ctx.user_id.clone(),
            ip: ctx.ip.clone(),
            user_agent: ctx.headers.get("user-agent").map(|s| s.to_string()),
            backend,
            bytes_in: None,
            bytes_out: None,
            error: error_message,
            rate_limited,
            cached: false,
            tier: Some(ctx.tier.as_str().to_string()),
        });

        if let Some(ml) = &self.ml {
            let minute_epoch = Utc::now().timestamp() / 60;
            ml.record(&ctx.path, minute_epoch, duration_ms, status_code >= 500).await;
        }

        response.map_err(Into::into)
    }

    async fn handle_internal(
        &self,
        ctx: &RequestContext,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<(HttpResponse, Option<String>), GatewayError> {
        let decision = self.limiter.check(ctx).await;
        self.metrics.record_rate_limit(RateLimitMetric {
            timestamp: Utc::now(),
            key: decision.key.clone(),
            endpoint: ctx.path.clone(),
            allowed: decision.allowed,
            remaining: decision.remaining,
            limit: decision.limit,
            user_id: ctx.user_id.clone(),
            ip: ctx.ip.clone(),
            tier: Some(ctx.tier.as_str().to_string()),
            algorithm: format!("{:?}", decision.algorithm),
        });

        if !decision.allowed {
            return Err(GatewayError::RateLimited {
                limit: decision.limit,
                remaining: decision.remaining,
                window_seconds: decision.window_seconds,
                retry_after: decision.retry_after,
                reset_at: decision.reset_at_ms,
            });
        }

        let route_match = self
            .router
            .match_path(&ctx.path)
            .ok_or_else(|| GatewayError::RouteNotFound { path: ctx.path.clone() })?;
        let backend = route_match.backend;

        if !self.backend_available(&backend.name).await {
            return Err(GatewayError::BackendUnavailable { backend: backend.name.clone() });
        }

        let response = self.forward_with_retries(&backend, req, body).await?;
        Ok((response, Some(backend.name.clone())))
    }

    /// A backend is available when its circuit is not open and health
    /// checking has not marked it unhealthy; an unknown (not-yet-probed)
    /// status is treated as available so freshly configured backends can
    /// take traffic before their first health check completes.
    async fn backend_available(&self, backend_name: &str) -> bool {
        let breaker = self.breakers.get_or_insert(backend_name).await;
        if !breaker.allow().await {
            return false;
        }
        match self.health.snapshot(backend_name) {
            Some(health) => health.status != HealthStatus::Unhealthy,
            None => true,
        }
    }

    async fn forward_with_retries(
        &self,
        backend: &Backend,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, GatewayError> {
        let breaker = self.breakers.get_or_insert(&backend.name).await;
        let target_url = format!("{}{}", backend.url, req.path());
        let reqwest_method = parse_method(req.method());
        let reqwest_headers = build_headers(req.headers());
        let max_attempts = backend.retry_attempts + 1;

        let mut last_error = None;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                warn!("retry attempt {attempt} for {target_url}");
                let breaker = self.breakers.get_or_insert(&backend.name).await;
                if !breaker.allow().await {
                    return Err(GatewayError::BackendUnavailable {
                        backend: backend.name.clone(),
                    });
                }
            }

            let request = self
                .client
                .request(reqwest_method.clone(), &target_url)
                .headers(reqwest_headers.clone())
                .body(body.to_vec());

            let sent = timeout(Duration::from_millis(backend.timeout_ms), request.send()).await;

            match sent {
                Ok(Ok(upstream_response)) => {
                    let status = upstream_response.status().as_u16();
                    if status >= 500 && attempt + 1 < max_attempts {
                        breaker.record_failure().await;
                        sleep(Duration::from_millis(backoff_ms(attempt))).await;
                        last_error = Some(GatewayError::Upstream(format!("status {status}")));
                        continue;
                    }

                    if status >= 500 {
                        breaker.record_failure().await;
                    } else {
                        breaker.record_success().await;
                    }
                    return build_response(upstream_response).await;
                }
                Ok(Err(e)) => {
                    breaker.record_failure().await;
                    last_error = Some(GatewayError::Upstream(e.to_string()));
                    if attempt + 1 < max_attempts {
                        sleep(Duration::from_millis(backoff_ms(attempt))).await;
                        continue;
                    }
                }
                Err(_) => {
                    breaker.record_failure().await;
                    last_error = Some(GatewayError::Timeout);
                    if attempt + 1 < max_attempts {
                        sleep(Duration::from_millis(backoff_ms(attempt))).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Upstream("retries exhausted".to_string())))
    }
}

fn backoff_ms(attempt: u32) -> u64 {
    MIN_BACKOFF_MS
        .saturating_mul(1u64 << attempt.min(8))
        .min(MAX_BACKOFF_MS)
}

async fn build_response(upstream: reqwest::Response) -> Result<HttpResponse, GatewayError> {
    let status = upstream.status().as_u16();
    let headers = upstream.headers().clone();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    let mut builder = HttpResponse::build(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in headers.iter() {
        if name.as_str().starts_with("connection") {
            continue;
        }
        if let Ok(header_value) = actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()) {
            builder.insert_header((name.as_str(), header_value));
        }
    }
    Ok(builder.body(bytes))
}

fn build_context(req: &HttpRequest) -> RequestContext {
    let mut headers = Headers::new();
    for (name, value) in req.headers() {
        if let Ok(value_str) = value.to_str() {
            headers.insert(name.as_str(), value_str);
        }
    }

    let ip = req
        .connection_info()
        .realip_remote_addr()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_id = headers.get("x-user-id").map(|s| s.to_string());
    let api_key = headers.get("x-api-key").map(|s| s.to_string());

    RequestContext::new(
        ip,
        req.path().to_string(),
        req.method().to_string(),
        headers,
        user_id,
        api_key,
        Tier::default(),
    )
}

fn build_headers(original: &actix_web::http::header::HeaderMap) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(original.len());
    for (key, value) in original {
        let key_str = key.as_str().to_ascii_lowercase();
        if SKIP_REQUEST_HEADERS.iter().any(|skip| key_str.starts_with(skip)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_ref()), HeaderValue::from_bytes(value.as_bytes())) {
            headers.insert(name, value);
        }
    }
    headers.entry("user-agent").or_insert_with(|| HeaderValue::from_static("aegis-gateway/0.1"));
    headers
}

fn parse_method(method: &ActixMethod) -> ReqwestMethod {
    match *method {
        ActixMethod::GET => ReqwestMethod::GET,
        ActixMethod::POST => ReqwestMethod::POST,
        ActixMethod::PUT => ReqwestMethod::PUT,
        ActixMethod::DELETE => ReqwestMethod::DELETE,
        ActixMethod::HEAD => ReqwestMethod::HEAD,
        ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        ActixMethod::PATCH => ReqwestMethod::PATCH,
        ActixMethod::TRACE => ReqwestMethod::TRACE,
        _ => ReqwestMethod::GET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_ms(0), 50);
        assert_eq!(backoff_ms(1), 100);
        assert_eq!(backoff_ms(5), 1_600);
        assert_eq!(backoff_ms(20), MAX_BACKOFF_MS);
    }
}
