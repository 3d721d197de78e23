//! Alert management endpoints (spec.md §4.9, §6): rule CRUD, lifecycle
//! actions on individual alerts, and history, all delegating to
//! [`AlertManager`] rather than touching the store directly.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::alerts::AlertManager;
use crate::models::alert::{AlertCondition, AlertRule, Severity};

pub fn configure_alerts(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/alerts")
            .route("/stats", web::get().to(stats))
            .route("/active", web::get().to(active))
            .route("/rules", web::get().to(list_rules))
            .route("/rules", web::post().to(create_rule))
            .route("/rules/{id}/enable", web::post().to(enable_rule))
            .route("/rules/{id}/disable", web::post().to(disable_rule))
            .route("/rules/{id}", web::delete().to(delete_rule))
            .route("/{id}/acknowledge", web::post().to(acknowledge))
            .route("/{id}/resolve", web::post().to(resolve))
            .route("/{id}/mute", web::post().to(mute))
            .route("/history", web::get().to(history)),
    );
}

async fn stats(alerts: web::Data<Arc<AlertManager>>) -> Result<HttpResponse> {
    let snapshot = alerts.alerts_snapshot().await;
    let active = snapshot.iter().filter(|a| a.status != crate::models::alert::AlertStatus::Resolved).count();
    Ok(HttpResponse::Ok().json(json!({
        "total": snapshot.len(),
        "active": active,
        "rules": alerts.rules_snapshot().await.len(),
    })))
}

async fn active(alerts: web::Data<Arc<AlertManager>>) -> Result<HttpResponse> {
    let snapshot = alerts.alerts_snapshot().await;
    let active: Vec<_> = snapshot
        .into_iter()
        .filter(|a| a.status != crate::models::alert::AlertStatus::Resolved)
        .collect();
    Ok(HttpResponse::Ok().json(active))
}

async fn list_rules(alerts: web::Data<Arc<AlertManager>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(alerts.rules_snapshot().await))
}

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    name: String,
    severity: Severity,
    condition: AlertCondition,
    actions: Vec<crate::models::alert::AlertAction>,
    cooldown_seconds: Option<u64>,
}

async fn create_rule(alerts: web::Data<Arc<AlertManager>>, body: web::Json<CreateRuleRequest>) -> Result<HttpResponse> {
    let body = body.into_inner();
    let now = Utc::now();
    let rule = AlertRule {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        enabled: true,
        severity: body.severity,
        condition: body.condition,
        actions: body.actions,
        cooldown_seconds: body.cooldown_seconds,
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };
    match alerts.create_rule(rule.clone()).await {
        Ok(()) => Ok(HttpResponse::Created().json(rule)),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(json!({ "error": e.to_string() }))),
    }
}

async fn enable_rule(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>) -> Result<HttpResponse> {
    set_enabled(alerts, id, true).await
}

async fn disable_rule(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>) -> Result<HttpResponse> {
    set_enabled(alerts, id, false).await
}

async fn set_enabled(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>, enabled: bool) -> Result<HttpResponse> {
    match alerts.set_rule_enabled(&id, enabled).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({ "id": id.as_str(), "enabled": enabled }))),
        Err(e) => Ok(HttpResponse::NotFound().json(json!({ "error": e }))),
    }
}

async fn delete_rule(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>) -> Result<HttpResponse> {
    match alerts.delete_rule(&id).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(json!({ "error": e }))),
    }
}

#[derive(Debug, Deserialize, Default)]
struct AcknowledgeRequest {
    by: Option<String>,
}

async fn acknowledge(
    alerts: web::Data<Arc<AlertManager>>,
    id: web::Path<String>,
    body: Option<web::Json<AcknowledgeRequest>>,
) -> Result<HttpResponse> {
    let by = body.and_then(|b| b.into_inner().by).unwrap_or_else(|| "operator".to_string());
    match alerts.acknowledge(&id, by).await {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(e) => Ok(HttpResponse::BadRequest().json(json!({ "error": e }))),
    }
}

async fn resolve(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>) -> Result<HttpResponse> {
    match alerts.resolve(&id).await {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(e) => Ok(HttpResponse::BadRequest().json(json!({ "error": e }))),
    }
}

#[derive(Debug, Deserialize)]
struct MuteRequest {
    until: chrono::DateTime<Utc>,
}

async fn mute(alerts: web::Data<Arc<AlertManager>>, id: web::Path<String>, body: web::Json<MuteRequest>) -> Result<HttpResponse> {
    match alerts.mute(&id, body.until).await {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        Err(e) => Ok(HttpResponse::BadRequest().json(json!({ "error": e }))),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    alert_id: Option<String>,
    limit: Option<i64>,
}

async fn history(alerts: web::Data<Arc<AlertManager>>, q: web::Query<HistoryQuery>) -> Result<HttpResponse> {
    match alerts.history(q.alert_id.as_deref(), q.limit.unwrap_or(100)).await {
        Ok(entries) => Ok(HttpResponse::Ok().json(entries)),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(json!({ "error": e.to_string() }))),
    }
}
