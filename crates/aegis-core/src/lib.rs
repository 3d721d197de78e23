//! # AEGIS Gateway Core
//!
//! Data-plane library for the AEGIS API gateway: route resolution and
//! reverse proxying, distributed rate limiting, backend health checks and
//! circuit breaking, a telemetry pipeline, alert evaluation, realtime
//! subscription push, and an optional remote ML collaborator.
//!
//! `aegis-gateway` (the binary crate) wires these modules together behind
//! an `actix-web` server; everything here is runtime-agnostic aside from
//! its use of `tokio` and is safe to exercise directly in tests.
//!
//! ## Module Organization
//!
//! - [`config`] — environment-driven settings and validation
//! - [`models`] — shared domain types: context, rules, backends, metrics, alerts, errors
//! - [`router`] — static/dynamic path resolution to a backend
//! - [`ratelimit`] — the four rate-limit algorithms, rule matching and bypass
//! - [`kv`] — the rate limiter's atomic counter store (Redis)
//! - [`breaker`] — per-backend circuit breakers
//! - [`health`] — periodic backend health probing
//! - [`proxy`] — the per-request pipeline tying the above together
//! - [`routes`] — the gateway's own management HTTP surface
//! - [`metrics`] — live counters, rolling window, and batched persistence
//! - [`tsdb`] — the metrics time-series store (Postgres) and aggregate queries
//! - [`alerts`] — alert rule evaluation and lifecycle management
//! - [`realtime`] — WebSocket subscription push for metrics and alerts
//! - [`ml`] — best-effort client for the remote anomaly-detection collaborator
//! - [`logs`] — structured logging setup

pub mod alerts;
pub mod breaker;
pub mod config;
pub mod health;
pub mod kv;
pub mod logs;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod proxy;
pub mod ratelimit;
pub mod realtime;
pub mod router;
pub mod routes;
pub mod tsdb;
