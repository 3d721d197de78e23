//! HTTP client to the remote anomaly-detection/optimization service
//! (spec.md §4.11), grounded in the teacher's `services::ai::AiService` for
//! the retry-with-backoff idiom and in `health::ReqwestProbe` for the
//! timeout-gated availability check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct MlClientConfig {
    pub base_url_set: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url_set: false,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRequest {
    pub endpoint: String,
    pub window_seconds: u64,
    pub request_rate: f64,
    pub error_rate: f64,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub score: f64,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeRequest {
    pub endpoint: String,
    pub tier: String,
    pub strategy: String,
    pub current_limit: u64,
    pub observed_request_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeResult {
    pub recommended_limit: u64,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub category: String,
    pub summary: String,
    pub confidence: f64,
}

/// Errors from a remote ML call; all are treated as "unavailable, carry on
/// without it" by callers, never as fatal.
#[derive(Debug, thiserror::Error)]
pub enum MlError {
    #[error("ml service not configured")]
    NotConfigured,
    #[error("ml service request failed: {0}")]
    Request(String),
    #[error("ml service returned an error status: {0}")]
    Status(u16),
}

/// HTTP client to the anomaly/optimization microservice. Every public call
/// has an explicit deadline and bounded linear-backoff retries; callers
/// should treat any [`MlError`] as "continue without ML input".
pub struct MlClient {
    client: reqwest::Client,
    base_url: Option<String>,
    config: MlClientConfig,
    available: AtomicBool,
}

impl MlClient {
    pub fn new(base_url: Option<String>, config: MlClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            config,
            available: AtomicBool::new(base_url_set(&config)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.base_url.is_some() && self.available.load(Ordering::Relaxed)
    }

    /// Polls the service's health endpoint and updates the cached
    /// availability flag that gates every other method.
    pub async fn refresh_availability(&self) {
        let Some(base_url) = &self.base_url else {
            self.available.store(false, Ordering::Relaxed);
            return;
        };
        let url = format!("{base_url}/health");
        let ok = self
            .client
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        self.available.store(ok, Ordering::Relaxed);
    }

    pub async fn detect_anomaly(&self, request: &AnomalyRequest) -> Result<AnomalyResult, MlError> {
        self.post_with_retry("/anomalies/detect", request).await
    }

    pub async fn optimize_rate_limit(&self, request: &OptimizeRequest) -> Result<OptimizeResult, MlError> {
        self.post_with_retry("/rate-limits/optimize", request).await
    }

    pub async fn recommendations(&self) -> Result<Vec<Recommendation>, MlError> {
        let base_url = self.base_url.as_ref().ok_or(MlError::NotConfigured)?;
        let url = format!("{base_url}/recommendations");
        self.get_with_retry(&url).await
    }

    async fn post_with_retry<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, MlError> {
        let base_url = self.base_url.as_ref().ok_or(MlError::NotConfigured)?;
        let url = format!("{base_url}{path}");

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
            match self.client.post(&url).timeout(self.config.timeout).json(body).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Resp>().await.map_err(|e| MlError::Request(e.to_string()));
                }
                Ok(response) => last_err = Some(MlError::Status(response.status().as_u16())),
                Err(e) => {
                    debug!("ml request attempt {attempt} to {url} failed: {e}");
                    last_err = Some(MlError::Request(e.to_string()));
                }
            }
        }
        Err(last_err.unwrap_or(MlError::Request("exhausted retries".to_string())))
    }

    async fn get_with_retry<Resp: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<Resp, MlError> {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
            match self.client.get(url).timeout(self.config.timeout).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Resp>().await.map_err(|e| MlError::Request(e.to_string()));
                }
                Ok(response) => last_err = Some(MlError::Status(response.status().as_u16())),
                Err(e) => last_err = Some(MlError::Request(e.to_string())),
            }
        }
        Err(last_err.unwrap_or(MlError::Request("exhausted retries".to_string())))
    }
}

fn base_url_set(config: &MlClientConfig) -> bool {
    config.base_url_set
}

#[derive(Debug, Clone, Default)]
struct MinuteBucket {
    request_count: u64,
    error_count: u64,
    total_latency_ms: f64,
}

/// Records every request into per-minute buckets and periodically forwards
/// the aggregate to the ML service, optionally calling back when an anomaly
/// is reported above threshold.
pub struct MlAggregator {
    client: Arc<MlClient>,
    buckets: Mutex<HashMap<(String, i64), MinuteBucket>>,
    anomaly_threshold: f64,
}

impl MlAggregator {
    pub fn new(client: Arc<MlClient>, anomaly_threshold: f64) -> Self {
        Self {
            client,
            buckets: Mutex::new(HashMap::new()),
            anomaly_threshold,
        }
    }

    pub async fn record(&self, endpoint: &str, minute_epoch: i64, duration_ms: u64, is_error: bool) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry((endpoint.to_string(), minute_epoch)).or_default();
        bucket.request_count += 1;
        bucket.total_latency_ms += duration_ms as f64;
        if is_error {
            bucket.error_count += 1;
        }
    }

    /// Forwards every completed minute bucket to the ML service and invokes
    /// `on_anomaly` for any endpoint scored above the configured threshold.
    pub async fn flush<F: Fn(&str, &AnomalyResult)>(&self, current_minute_epoch: i64, on_anomaly: F) {
        if !self.client.is_available() {
            return;
        }
        let completed: Vec<((String, i64), MinuteBucket)> = {
            let mut buckets = self.buckets.lock().await;
            let keys: Vec<(String, i64)> = buckets.keys().filter(|(_, m)| *m < current_minute_epoch).cloned().collect();
            keys.into_iter().filter_map(|k| buckets.remove(&k).map(|v| (k, v))).collect()
        };

        for ((endpoint, _minute), bucket) in completed {
            if bucket.request_count == 0 {
                continue;
            }
            let request = AnomalyRequest {
                endpoint: endpoint.clone(),
                window_seconds: 60,
                request_rate: bucket.request_count as f64 / 60.0,
                error_rate: bucket.error_count as f64 / bucket.request_count as f64,
                p95_latency_ms: bucket.total_latency_ms / bucket.request_count as f64,
            };
            match self.client.detect_anomaly(&request).await {
                Ok(result) if result.score >= self.anomaly_threshold => on_anomaly(&endpoint, &result),
                Ok(_) => {}
                Err(e) => warn!("ml aggregator flush failed for endpoint {endpoint}: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_client_is_never_available() {
        let client = MlClient::new(None, MlClientConfig::default());
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn aggregator_skips_flush_when_client_unavailable() {
        let client = Arc::new(MlClient::new(None, MlClientConfig::default()));
        let aggregator = MlAggregator::new(client, 0.8);
        aggregator.record("/api/orders", 100, 50, false).await;
        let mut called = false;
        aggregator.flush(101, |_, _| called = true).await;
        assert!(!called);
    }

    #[tokio::test]
    async fn post_with_retry_fails_fast_when_not_configured() {
        let client = MlClient::new(None, MlClientConfig::default());
        let result = client
            .detect_anomaly(&AnomalyRequest {
                endpoint: "/api/orders".to_string(),
                window_seconds: 60,
                request_rate: 10.0,
                error_rate: 0.0,
                p95_latency_ms: 50.0,
            })
            .await;
        assert!(matches!(result, Err(MlError::NotConfigured)));
    }
}
