//! Aggregate query layer over the [`TimeSeriesStore`] (spec.md §4.8), with
//! an in-memory fallback for `overview` when the store is unavailable.

use std::sync::Arc;

use chrono::Utc;

use crate::metrics::collector::MetricsCollector;
use crate::models::metrics::MetricRange;
use crate::tsdb::{EndpointStats, LatencyPercentiles, Overview, SeriesPoint, StoreError, TimeSeriesStore};

pub struct MetricsQuery {
    store: Arc<dyn TimeSeriesStore>,
    collector: MetricsCollector,
}

impl MetricsQuery {
    pub fn new(store: Arc<dyn TimeSeriesStore>, collector: MetricsCollector) -> Self {
        Self { store, collector }
    }

    /// Falls back to the collector's live snapshot if the store is down, so
    /// the overview panel keeps working during a storage outage.
    pub async fn overview(&self, range: &MetricRange) -> Overview {
        let (start, end) = range.resolve(Utc::now());
        match self.store.overview(start, end).await {
            Ok(mut overview) => {
                overview.active_connections = self.collector.snapshot().active_connections.max(0) as u64;
                overview
            }
            Err(e) => {
                log::warn!("overview query failed, falling back to live snapshot: {e}");
                self.overview_from_snapshot()
            }
        }
    }

    fn overview_from_snapshot(&self) -> Overview {
        let snapshot = self.collector.snapshot();
        let total_duration: u64 = snapshot.window.iter().map(|(_, b)| b.total_duration_ms).sum();
        let total_count: u64 = snapshot.window.iter().map(|(_, b)| b.count).sum();
        Overview {
            total_requests: snapshot.total_requests as i64,
            success_count: snapshot.success_count as i64,
            error_count: snapshot.fail_count as i64,
            rate_limited_count: snapshot.rate_limited_count as i64,
            cached_count: snapshot.cached_count as i64,
            avg_duration_ms: if total_count > 0 {
                total_duration as f64 / total_count as f64
            } else {
                0.0
            },
            active_connections: snapshot.active_connections.max(0) as u64,
        }
    }

    /// Series queries return empty on store failure rather than falling back
    /// to the rolling window, per spec.md §4.8.
    pub async fn request_rate(&self, range: &MetricRange) -> Vec<SeriesPoint> {
        let (start, end) = range.resolve(Utc::now());
        self.store
            .request_rate(start, end, range.bucket_width())
            .await
            .unwrap_or_else(|e| {
                log::warn!("request_rate query failed: {e}");
                Vec::new()
            })
    }

    pub async fn latency_percentiles(&self, range: &MetricRange) -> LatencyPercentiles {
        let (start, end) = range.resolve(Utc::now());
        self.store.latency_percentiles(start, end).await.unwrap_or_else(|e| {
            log::warn!("latency_percentiles query failed: {e}");
            LatencyPercentiles::default()
        })
    }

    pub async fn error_rate(&self, range: &MetricRange) -> Vec<SeriesPoint> {
        let (start, end) = range.resolve(Utc::now());
        self.store
            .error_rate(start, end, range.bucket_width())
            .await
            .unwrap_or_else(|e| {
                log::warn!("error_rate query failed: {e}");
                Vec::new()
            })
    }

    pub async fn status_distribution(&self, range: &MetricRange) -> Vec<(u16, i64)> {
        let (start, end) = range.resolve(Utc::now());
        self.store.status_distribution(start, end).await.unwrap_or_else(|e| {
            log::warn!("status_distribution query failed: {e}");
            Vec::new()
        })
    }

    pub async fn top_endpoints(&self, range: &MetricRange, limit: u32) -> Vec<EndpointStats> {
        let (start, end) = range.resolve(Utc::now());
        self.store.top_endpoints(start, end, limit).await.unwrap_or_else(|e| {
            log::warn!("top_endpoints query failed: {e}");
            Vec::new()
        })
    }

    pub async fn endpoint_metrics(
        &self,
        range: &MetricRange,
        endpoint: Option<&str>,
        method: Option<&str>,
    ) -> Vec<EndpointStats> {
        let (start, end) = range.resolve(Utc::now());
        self.store
            .endpoint_metrics(start, end, endpoint, method)
            .await
            .unwrap_or_else(|e| {
                log::warn!("endpoint_metrics query failed: {e}");
                Vec::new()
            })
    }

    /// Deletes rows older than `retention_days`; used by the retention task.
    pub async fn enforce_retention(&self, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        self.store.delete_older_than(cutoff).await
    }

    /// Single scalar metric value, used by the alert evaluator (spec.md §4.9).
    pub async fn metric_value(
        &self,
        metric: &str,
        window_seconds: u64,
        endpoint: Option<&str>,
        backend: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        self.store.metric_value(metric, window_seconds, endpoint, backend, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::CollectorConfig;
    use crate::models::metrics::RangePreset;
    use async_trait::async_trait;
    use chrono::DateTime;

    struct FailingStore;

    #[async_trait]
    impl TimeSeriesStore for FailingStore {
        async fn insert_request_metrics(&self, _rows: &[crate::models::metrics::RequestMetric]) -> Result<(), StoreError> {
            Ok(())
        }
        async fn insert_rate_limit_metrics(
            &self,
            _rows: &[crate::models::metrics::RateLimitMetric],
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn insert_backend_metrics(&self, _rows: &[crate::models::metrics::BackendMetric]) -> Result<(), StoreError> {
            Ok(())
        }
        async fn overview(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Overview, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn request_rate(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _bucket: chrono::Duration,
        ) -> Result<Vec<SeriesPoint>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn latency_percentiles(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<LatencyPercentiles, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn error_rate(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _bucket: chrono::Duration,
        ) -> Result<Vec<SeriesPoint>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn status_distribution(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<(u16, i64)>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn top_endpoints(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _limit: u32,
        ) -> Result<Vec<EndpointStats>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn endpoint_metrics(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _endpoint: Option<&str>,
            _method: Option<&str>,
        ) -> Result<Vec<EndpointStats>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn metric_value(
            &self,
            _metric: &str,
            _window_seconds: u64,
            _endpoint: Option<&str>,
            _backend: Option<&str>,
            _now: DateTime<Utc>,
        ) -> Result<f64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn overview_falls_back_to_live_snapshot_on_store_failure() {
        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        let collector = MetricsCollector::spawn(Arc::new(FailingStore), CollectorConfig::default(), rx);
        let query = MetricsQuery::new(Arc::new(FailingStore), collector);
        let overview = query.overview(&MetricRange::Preset(RangePreset::OneHour)).await;
        assert_eq!(overview.total_requests, 0);
    }

    #[tokio::test]
    async fn series_queries_return_empty_on_store_failure() {
        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        let collector = MetricsCollector::spawn(Arc::new(FailingStore), CollectorConfig::default(), rx);
        let query = MetricsQuery::new(Arc::new(FailingStore), collector);
        let points = query.request_rate(&MetricRange::Preset(RangePreset::OneHour)).await;
        assert!(points.is_empty());
    }
}
