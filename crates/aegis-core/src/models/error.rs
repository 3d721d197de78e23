//! Gateway-wide error taxonomy, generalized from the teacher's
//! `models::error::GatewayError` to the behavioral buckets of spec.md §7:
//! denied-by-policy, transient-backend-failure, dependency-unavailable,
//! bad-input and fatal.

use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Denied by policy: rate limit exceeded. Surfaced as 429.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        remaining: u64,
        window_seconds: u64,
        retry_after: u64,
        reset_at: i64,
    },

    /// Denied by policy: circuit breaker open or backend unavailable.
    #[error("backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    /// No configured route matches the request path.
    #[error("no route matches path: {path}")]
    RouteNotFound { path: String },

    /// Backend responded, ultimately, with a failure after retries, or a
    /// transport-level error occurred.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The backend call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Malformed caller input, e.g. an invalid alert rule body.
    #[error("bad request: {0}")]
    BadInput(String),

    /// Misconfiguration or unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            GatewayError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::Timeout => "UPSTREAM_TIMEOUT",
            GatewayError::BadInput(_) => "BAD_INPUT",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        let code = self.code();
        match self {
            GatewayError::RateLimited {
                limit,
                remaining,
                window_seconds,
                retry_after,
                reset_at,
            } => HttpResponse::TooManyRequests()
                .insert_header(("X-RateLimit-Limit", limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", remaining.to_string()))
                .insert_header(("X-RateLimit-Reset", reset_at.to_string()))
                .insert_header(("Retry-After", retry_after.to_string()))
                .json(json!({
                    "error": "rate limit exceeded",
                    "code": code,
                    "message": message,
                    "limit": limit,
                    "remaining": remaining,
                    "windowSeconds": window_seconds,
                    "retryAfter": retry_after,
                    "resetAt": reset_at,
                })),
            GatewayError::BackendUnavailable { .. } => HttpResponse::ServiceUnavailable().json(json!({
                "error": message,
                "code": code,
            })),
            GatewayError::RouteNotFound { .. } => HttpResponse::NotFound().json(json!({
                "error": message,
                "code": code,
            })),
            GatewayError::Upstream(_) => HttpResponse::BadGateway().json(json!({
                "error": message,
                "code": code,
            })),
            GatewayError::Timeout => HttpResponse::GatewayTimeout().json(json!({
                "error": message,
                "code": code,
            })),
            GatewayError::BadInput(detail) => HttpResponse::BadRequest().json(json!({
                "error": message,
                "code": code,
                "details": detail,
            })),
            GatewayError::Internal(_) => HttpResponse::InternalServerError().json(json!({
                "error": message,
                "code": code,
            })),
        }
    }
}
