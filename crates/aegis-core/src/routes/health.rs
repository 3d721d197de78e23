//! Gateway and backend health endpoints (spec.md §6), grounded in the
//! teacher's `routes::health::{health_check, readiness_check, liveness_check}`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use actix_web::{web, HttpResponse, Result};
use serde_json::json;

use crate::breaker::CircuitBreakerRegistry;
use crate::health::HealthChecker;

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/health")
            .route("/gateway", web::get().to(gateway_health))
            .route("/backends", web::get().to(all_backends))
            .route("/backends/{name}", web::get().to(one_backend))
            .route("/backends/{name}/check", web::post().to(trigger_check))
            .route("/circuit-breakers", web::get().to(all_breakers))
            .route("/circuit-breakers/{name}/open", web::post().to(open_breaker))
            .route("/circuit-breakers/{name}/close", web::post().to(close_breaker)),
    );
}

async fn gateway_health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
    })))
}

async fn all_backends(health: web::Data<Arc<HealthChecker>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(health.all()))
}

async fn one_backend(health: web::Data<Arc<HealthChecker>>, name: web::Path<String>) -> Result<HttpResponse> {
    match health.snapshot(&name) {
        Some(status) => Ok(HttpResponse::Ok().json(status)),
        None => Ok(HttpResponse::NotFound().json(json!({ "error": format!("unknown backend: {}", name.as_str()) }))),
    }
}

async fn trigger_check(health: web::Data<Arc<HealthChecker>>, name: web::Path<String>) -> Result<HttpResponse> {
    match health.trigger(&name).await {
        Some(metric) => Ok(HttpResponse::Ok().json(metric)),
        None => Ok(HttpResponse::NotFound().json(json!({ "error": format!("unknown backend: {}", name.as_str()) }))),
    }
}

async fn all_breakers(breakers: web::Data<Arc<CircuitBreakerRegistry>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(breakers.stats().await))
}

async fn open_breaker(breakers: web::Data<Arc<CircuitBreakerRegistry>>, name: web::Path<String>) -> Result<HttpResponse> {
    breakers.force_open(&name).await;
    Ok(HttpResponse::Ok().json(json!({ "backend": name.as_str(), "state": "open" })))
}

async fn close_breaker(breakers: web::Data<Arc<CircuitBreakerRegistry>>, name: web::Path<String>) -> Result<HttpResponse> {
    breakers.force_close(&name).await;
    Ok(HttpResponse::Ok().json(json!({ "backend": name.as_str(), "state": "closed" })))
}
