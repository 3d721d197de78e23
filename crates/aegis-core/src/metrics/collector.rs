//! In-memory counters plus batched persistence (spec.md §4.8), grounded in
//! the teacher's `services::metrics_store::MetricsStore`: a rolling
//! second-bucketed window for sub-second dashboard reads, backed by a
//! background flush task that bulk-inserts into the [`TimeSeriesStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use log::{error, warn};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::metrics::{BackendMetric, RateLimitMetric, RequestMetric};
use crate::tsdb::TimeSeriesStore;

const ROLLING_WINDOW_SECS: i64 = 60;

/// Per-second bucket of the rolling window: count, accumulated duration and
/// error count for requests observed during that second.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SecondBucket {
    pub count: u64,
    pub total_duration_ms: u64,
    pub errors: u64,
}

/// Point-in-time counters read directly by dashboards without touching the
/// time-series store.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub rate_limited_count: u64,
    pub cached_count: u64,
    pub active_connections: i64,
    pub window: Vec<(i64, SecondBucket)>,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    /// Uniform sampling rate in `[0.0, 1.0]` applied to request metrics
    /// before they are enqueued for persistence; `1.0` disables sampling.
    pub sample_rate: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            batch_size: 500,
            sample_rate: 1.0,
        }
    }
}

struct LiveCounters {
    total_requests: AtomicU64,
    success_count: AtomicU64,
    fail_count: AtomicU64,
    rate_limited_count: AtomicU64,
    cached_count: AtomicU64,
    active_connections: AtomicI64,
}

impl Default for LiveCounters {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
            rate_limited_count: AtomicU64::new(0),
            cached_count: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
        }
    }
}

enum BufferedMetric {
    Request(RequestMetric),
    RateLimit(RateLimitMetric),
    Backend(BackendMetric),
}

/// Ties the in-memory rolling window, live counters, and batched-flush
/// pipeline together. Cheap to clone; every field is internally shared.
#[derive(Clone)]
pub struct MetricsCollector {
    counters: Arc<LiveCounters>,
    window: Arc<RwLock<HashMap<i64, SecondBucket>>>,
    sender: mpsc::UnboundedSender<BufferedMetric>,
    flush_notify: Arc<tokio::sync::Notify>,
    config: CollectorConfig,
}

impl MetricsCollector {
    /// Spawns the background flush task and returns the collector handle.
    /// `shutdown` is subscribed to perform one final flush before exiting.
    pub fn spawn(
        store: Arc<dyn TimeSeriesStore>,
        config: CollectorConfig,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<BufferedMetric>();
        let flush_notify = Arc::new(tokio::sync::Notify::new());
        let collector = Self {
            counters: Arc::new(LiveCounters::default()),
            window: Arc::new(RwLock::new(HashMap::new())),
            sender,
            flush_notify: flush_notify.clone(),
            config,
        };

        tokio::spawn(async move {
            let mut requests: Vec<RequestMetric> = Vec::new();
            let mut rate_limits: Vec<RateLimitMetric> = Vec::new();
            let mut backends: Vec<BackendMetric> = Vec::new();
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(config.flush_interval_ms));

            loop {
                tokio::select! {
                    maybe_metric = receiver.recv() => {
                        match maybe_metric {
                            Some(BufferedMetric::Request(m)) => requests.push(m),
                            Some(BufferedMetric::RateLimit(m)) => rate_limits.push(m),
                            Some(BufferedMetric::Backend(m)) => backends.push(m),
                            None => break,
                        }
                        if requests.len() >= config.batch_size
                            || rate_limits.len() >= config.batch_size
                            || backends.len() >= config.batch_size
                        {
                            flush(&store, &mut requests, &mut rate_limits, &mut backends).await;
                        }
                    }
                    _ = interval.tick() => {
                        flush(&store, &mut requests, &mut rate_limits, &mut backends).await;
                    }
                    _ = flush_notify.notified() => {
                        flush(&store, &mut requests, &mut rate_limits, &mut backends).await;
                    }
                    _ = shutdown.recv() => {
                        flush(&store, &mut requests, &mut rate_limits, &mut backends).await;
                        break;
                    }
                }
            }
        });

        collector
    }

    pub fn increment_active_connections(&self) {
        self.counters.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        self.counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one completed request: updates live counters, the rolling
    /// window, and (subject to sampling) enqueues for persistence.
    pub fn record_request(&self, metric: RequestMetric) {
        let now = Utc::now();
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if metric.status_code >= 400 {
            self.counters.fail_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.success_count.fetch_add(1, Ordering::Relaxed);
        }
        if metric.rate_limited {
            self.counters.rate_limited_count.fetch_add(1, Ordering::Relaxed);
        }
        if metric.cached {
            self.counters.cached_count.fetch_add(1, Ordering::Relaxed);
        }

        self.touch_window(now.timestamp(), metric.duration_ms, metric.status_code >= 400);

        if self.should_sample() {
            if self.sender.send(BufferedMetric::Request(metric)).is_err() {
                warn!("metrics flush task is gone, dropping request metric");
            }
        }
    }

    pub fn record_rate_limit(&self, metric: RateLimitMetric) {
        if self.sender.send(BufferedMetric::RateLimit(metric)).is_err() {
            warn!("metrics flush task is gone, dropping rate-limit metric");
        }
    }

    pub fn record_backend(&self, metric: BackendMetric) {
        if self.sender.send(BufferedMetric::Backend(metric)).is_err() {
            warn!("metrics flush task is gone, dropping backend metric");
        }
    }

    /// Wakes the background flush task immediately instead of waiting for
    /// `flush_interval_ms` to elapse. Used by the `/api/metrics/flush` route.
    pub fn request_flush(&self) {
        self.flush_notify.notify_one();
    }

    fn should_sample(&self) -> bool {
        self.config.sample_rate >= 1.0 || rand::thread_rng().gen_bool(self.config.sample_rate.clamp(0.0, 1.0))
    }

    fn touch_window(&self, now_secs: i64, duration_ms: u64, is_error: bool) {
        let cutoff = now_secs - ROLLING_WINDOW_SECS;
        let mut window = self.window.write().unwrap();
        window.retain(|bucket_secs, _| *bucket_secs >= cutoff);
        let bucket = window.entry(now_secs).or_default();
        bucket.count += 1;
        bucket.total_duration_ms += duration_ms;
        if is_error {
            bucket.errors += 1;
        }
    }

    /// Snapshot of the live counters and rolling window, used when the
    /// time-series store is unreachable (spec.md §4.8's overview fallback).
    pub fn snapshot(&self) -> LiveSnapshot {
        let window = self.window.read().unwrap();
        let mut buckets: Vec<(i64, SecondBucket)> = window.iter().map(|(k, v)| (*k, *v)).collect();
        buckets.sort_by_key(|(secs, _)| *secs);
        LiveSnapshot {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            success_count: self.counters.success_count.load(Ordering::Relaxed),
            fail_count: self.counters.fail_count.load(Ordering::Relaxed),
            rate_limited_count: self.counters.rate_limited_count.load(Ordering::Relaxed),
            cached_count: self.counters.cached_count.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            window: buckets,
        }
    }
}

async fn flush(
    store: &Arc<dyn TimeSeriesStore>,
    requests: &mut Vec<RequestMetric>,
    rate_limits: &mut Vec<RateLimitMetric>,
    backends: &mut Vec<BackendMetric>,
) {
    if !requests.is_empty() {
        if let Err(e) = store.insert_request_metrics(requests).await {
            error!("failed to flush request metrics: {e}");
        }
        requests.clear();
    }
    if !rate_limits.is_empty() {
        if let Err(e) = store.insert_rate_limit_metrics(rate_limits).await {
            error!("failed to flush rate-limit metrics: {e}");
        }
        rate_limits.clear();
    }
    if !backends.is_empty() {
        if let Err(e) = store.insert_backend_metrics(backends).await {
            error!("failed to flush backend metrics: {e}");
        }
        backends.clear();
    }
}
