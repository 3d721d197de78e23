//! HTTP route handlers for the gateway's own management surface (spec.md
//! §6), grounded in the teacher's `routes::health`/`routes::metrics`
//! `web::ServiceConfig` idiom. These sit alongside, not behind,
//! [`crate::proxy::ProxyPipeline`]: the pipeline serves everything not
//! matched by one of these fixed paths.

pub mod alerts;
pub mod health;
pub mod metrics;
