//! Telemetry pipeline (spec.md §4.8): live counters and a rolling window in
//! [`collector`], batched persistence into the time-series store, and the
//! aggregate query surface in [`query`].

pub mod collector;
pub mod query;

pub use collector::{CollectorConfig, MetricsCollector};
pub use query::MetricsQuery;
