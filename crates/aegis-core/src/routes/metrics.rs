//! Metrics query endpoints (spec.md §4.8, §6), grounded in the teacher's
//! `routes::metrics::metrics_endpoint` for the "one collector, one
//! `ServiceConfig` function" shape, generalized from a single Prometheus
//! text dump to a handful of JSON aggregate queries plus the live snapshot.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use crate::metrics::{MetricsCollector, MetricsQuery};
use crate::models::metrics::{MetricRange, RangePreset};

#[derive(Debug, Deserialize)]
struct RangeQuery {
    range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointQuery {
    range: Option<String>,
    endpoint: Option<String>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopQuery {
    range: Option<String>,
    limit: Option<u32>,
}

fn resolve_range(raw: Option<&str>) -> MetricRange {
    let preset = raw.and_then(RangePreset::parse).unwrap_or(RangePreset::OneHour);
    MetricRange::Preset(preset)
}

pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/metrics")
            .route("/requests", web::get().to(requests))
            .route("/latency", web::get().to(latency))
            .route("/latency/current", web::get().to(latency_current))
            .route("/errors", web::get().to(errors))
            .route("/status", web::get().to(status_distribution))
            .route("/endpoints", web::get().to(endpoints))
            .route("/endpoints/top", web::get().to(endpoints_top))
            .route("/stats", web::get().to(overview))
            .route("/flush", web::post().to(flush)),
    );
}

async fn overview(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<RangeQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    Ok(HttpResponse::Ok().json(queries.overview(&range).await))
}

async fn requests(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<RangeQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    Ok(HttpResponse::Ok().json(queries.request_rate(&range).await))
}

async fn latency(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<RangeQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    Ok(HttpResponse::Ok().json(queries.latency_percentiles(&range).await))
}

/// Sub-second latency/throughput read straight off the rolling window,
/// bypassing the time-series store entirely.
async fn latency_current(collector: web::Data<MetricsCollector>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(collector.snapshot()))
}

async fn errors(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<RangeQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    Ok(HttpResponse::Ok().json(queries.error_rate(&range).await))
}

async fn status_distribution(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<RangeQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    let distribution = queries.status_distribution(&range).await;
    Ok(HttpResponse::Ok().json(
        distribution
            .into_iter()
            .map(|(status, count)| json!({ "status": status, "count": count }))
            .collect::<Vec<_>>(),
    ))
}

async fn endpoints(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<EndpointQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    let rows = queries.endpoint_metrics(&range, q.endpoint.as_deref(), q.method.as_deref()).await;
    Ok(HttpResponse::Ok().json(rows))
}

async fn endpoints_top(queries: web::Data<Arc<MetricsQuery>>, q: web::Query<TopQuery>) -> Result<HttpResponse> {
    let range = resolve_range(q.range.as_deref());
    let rows = queries.top_endpoints(&range, q.limit.unwrap_or(10)).await;
    Ok(HttpResponse::Ok().json(rows))
}

/// Wakes the collector's background flush task immediately, without
/// waiting for `flush_interval_ms` to elapse.
async fn flush(collector: web::Data<MetricsCollector>) -> Result<HttpResponse> {
    collector.request_flush();
    Ok(HttpResponse::Accepted().json(json!({ "message": "flush requested" })))
}
