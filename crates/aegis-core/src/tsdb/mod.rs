//! Wrapper over a relational time-series database: batched writes and
//! aggregate queries for the [`crate::metrics`] collector.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::alerts::store::AlertStore;
use crate::models::alert::{Alert, AlertHistoryEntry, AlertRule};
use crate::models::metrics::{BackendMetric, RateLimitMetric, RequestMetric};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("time-series store unavailable: {0}")]
    Unavailable(String),
    #[error("time-series store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}

/// One bucket of a time-bucketed series query result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub bucket_start: DateTime<Utc>,
    pub value: f64,
}

/// Result of `overview()`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_requests: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub rate_limited_count: i64,
    pub cached_count: i64,
    pub avg_duration_ms: f64,
    pub active_connections: u64,
}

/// Result of `latency_percentiles()`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Row of `endpoint_metrics()` / `top_endpoints()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub endpoint: String,
    pub method: String,
    pub count: i64,
    pub avg_duration_ms: f64,
    pub error_count: i64,
}

/// Async contract for the time-series store, generalized so components can
/// be tested against an in-memory fake that simulates store unavailability
/// (fail-soft persistence, empty-series reads, per spec.md §4.8 / §7).
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn insert_request_metrics(&self, rows: &[RequestMetric]) -> Result<(), StoreError>;
    async fn insert_rate_limit_metrics(&self, rows: &[RateLimitMetric]) -> Result<(), StoreError>;
    async fn insert_backend_metrics(&self, rows: &[BackendMetric]) -> Result<(), StoreError>;

    async fn overview(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Overview, StoreError>;
    async fn request_rate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket: chrono::Duration,
    ) -> Result<Vec<SeriesPoint>, StoreError>;
    async fn latency_percentiles(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<LatencyPercentiles, StoreError>;
    async fn error_rate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket: chrono::Duration,
    ) -> Result<Vec<SeriesPoint>, StoreError>;
    async fn status_distribution(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(u16, i64)>, StoreError>;
    async fn top_endpoints(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EndpointStats>, StoreError>;
    async fn endpoint_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        endpoint: Option<&str>,
        method: Option<&str>,
    ) -> Result<Vec<EndpointStats>, StoreError>;

    /// A single scalar metric value, used by the alert evaluator's narrow
    /// `(metric, window, endpoint?, backend?) -> value` interface (spec.md §4.9/§9).
    async fn metric_value(
        &self,
        metric: &str,
        window_seconds: u64,
        endpoint: Option<&str>,
        backend: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Production [`TimeSeriesStore`] backed by Postgres.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Creates the append-only metric tables and the management tables for
    /// alert rules/alerts/history if they do not already exist. Indexes
    /// mirror spec.md §6's persisted-schema section.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_metrics (
                timestamp TIMESTAMPTZ NOT NULL,
                request_id TEXT NOT NULL,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                status_code SMALLINT NOT NULL,
                duration_ms BIGINT NOT NULL,
                user_id TEXT,
                ip TEXT NOT NULL,
                user_agent TEXT,
                backend TEXT,
                bytes_in BIGINT,
                bytes_out BIGINT,
                error TEXT,
                rate_limited BOOLEAN NOT NULL,
                cached BOOLEAN NOT NULL,
                tier TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_request_metrics_ts ON request_metrics (timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_request_metrics_path ON request_metrics (path);
            CREATE INDEX IF NOT EXISTS idx_request_metrics_status ON request_metrics (status_code);

            CREATE TABLE IF NOT EXISTS rate_limit_metrics (
                timestamp TIMESTAMPTZ NOT NULL,
                key TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                allowed BOOLEAN NOT NULL,
                remaining BIGINT NOT NULL,
                "limit" BIGINT NOT NULL,
                user_id TEXT,
                ip TEXT NOT NULL,
                tier TEXT,
                algorithm TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rl_metrics_ts ON rate_limit_metrics (timestamp DESC);

            CREATE TABLE IF NOT EXISTS backend_metrics (
                timestamp TIMESTAMPTZ NOT NULL,
                backend TEXT NOT NULL,
                healthy BOOLEAN NOT NULL,
                response_time_ms BIGINT,
                consecutive_failures INT NOT NULL,
                consecutive_successes INT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_backend_metrics_ts ON backend_metrics (timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_backend_metrics_backend ON backend_metrics (backend);

            CREATE TABLE IF NOT EXISTS alert_rules (
                id TEXT PRIMARY KEY,
                document JSONB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                status TEXT NOT NULL,
                document JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_rule ON alerts ("rule_id");
            CREATE INDEX IF NOT EXISTS idx_alerts_active ON alerts (status) WHERE status = 'active';

            CREATE TABLE IF NOT EXISTS alert_history (
                alert_id TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for PostgresStore {
    async fn insert_request_metrics(&self, rows: &[RequestMetric]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO request_metrics
                   (timestamp, request_id, path, method, status_code, duration_ms, user_id, ip,
                    user_agent, backend, bytes_in, bytes_out, error, rate_limited, cached, tier)
                   VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)"#,
            )
            .bind(row.timestamp)
            .bind(&row.request_id)
            .bind(&row.path)
            .bind(&row.method)
            .bind(row.status_code as i16)
            .bind(row.duration_ms as i64)
            .bind(&row.user_id)
            .bind(&row.ip)
            .bind(&row.user_agent)
            .bind(&row.backend)
            .bind(row.bytes_in.map(|v| v as i64))
            .bind(row.bytes_out.map(|v| v as i64))
            .bind(&row.error)
            .bind(row.rate_limited)
            .bind(row.cached)
            .bind(&row.tier)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_rate_limit_metrics(&self, rows: &[RateLimitMetric]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO rate_limit_metrics
                   (timestamp, key, endpoint, allowed, remaining, "limit", user_id, ip, tier, algorithm)
                   VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"#,
            )
            .bind(row.timestamp)
            .bind(&row.key)
            .bind(&row.endpoint)
            .bind(row.allowed)
            .bind(row.remaining as i64)
            .bind(row.limit as i64)
            .bind(&row.user_id)
            .bind(&row.ip)
            .bind(&row.tier)
            .bind(&row.algorithm)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_backend_metrics(&self, rows: &[BackendMetric]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"INSERT INTO backend_metrics
                   (timestamp, backend, healthy, response_time_ms, consecutive_failures, consecutive_successes)
                   VALUES ($1,$2,$3,$4,$5,$6)"#,
            )
            .bind(row.timestamp)
            .bind(&row.backend)
            .bind(row.healthy)
            .bind(row.response_time_ms.map(|v| v as i64))
            .bind(row.consecutive_failures as i32)
            .bind(row.consecutive_successes as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn overview(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Overview, StoreError> {
        let row: (i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            r#"SELECT
                 count(*),
                 count(*) FILTER (WHERE status_code < 400),
                 count(*) FILTER (WHERE status_code >= 400),
                 count(*) FILTER (WHERE rate_limited),
                 count(*) FILTER (WHERE cached),
                 avg(duration_ms)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2"#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(Overview {
            total_requests: row.0,
            success_count: row.1,
            error_count: row.2,
            rate_limited_count: row.3,
            cached_count: row.4,
            avg_duration_ms: row.5.unwrap_or(0.0),
            active_connections: 0,
        })
    }

    async fn request_rate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket: chrono::Duration,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let bucket_secs = bucket.num_seconds().max(1);
        let rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(
            r#"SELECT to_timestamp(floor(extract(epoch from timestamp) / $3) * $3) AS bucket,
                      count(*)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2
               GROUP BY bucket ORDER BY bucket"#,
        )
        .bind(start)
        .bind(end)
        .bind(bucket_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(bucket_start, count)| SeriesPoint {
                bucket_start,
                value: count as f64,
            })
            .collect())
    }

    async fn latency_percentiles(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<LatencyPercentiles, StoreError> {
        let row: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
            r#"SELECT
                 percentile_cont(0.50) WITHIN GROUP (ORDER BY duration_ms),
                 percentile_cont(0.90) WITHIN GROUP (ORDER BY duration_ms),
                 percentile_cont(0.95) WITHIN GROUP (ORDER BY duration_ms),
                 percentile_cont(0.99) WITHIN GROUP (ORDER BY duration_ms)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2"#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(LatencyPercentiles {
            p50: row.0.unwrap_or(0.0),
            p90: row.1.unwrap_or(0.0),
            p95: row.2.unwrap_or(0.0),
            p99: row.3.unwrap_or(0.0),
        })
    }

    async fn error_rate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket: chrono::Duration,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let bucket_secs = bucket.num_seconds().max(1);
        let rows: Vec<(DateTime<Utc>, i64, i64)> = sqlx::query_as(
            r#"SELECT to_timestamp(floor(extract(epoch from timestamp) / $3) * $3) AS bucket,
                      count(*) FILTER (WHERE status_code >= 400),
                      count(*)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2
               GROUP BY bucket ORDER BY bucket"#,
        )
        .bind(start)
        .bind(end)
        .bind(bucket_secs as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(bucket_start, errors, total)| SeriesPoint {
                bucket_start,
                value: if total > 0 {
                    errors as f64 / total as f64
                } else {
                    0.0
                },
            })
            .collect())
    }

    async fn status_distribution(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(u16, i64)>, StoreError> {
        let rows: Vec<(i16, i64)> = sqlx::query_as(
            r#"SELECT status_code, count(*) FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2
               GROUP BY status_code ORDER BY status_code"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(code, count)| (code as u16, count)).collect())
    }

    async fn top_endpoints(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EndpointStats>, StoreError> {
        let rows: Vec<(String, String, i64, Option<f64>, i64)> = sqlx::query_as(
            r#"SELECT path, method, count(*), avg(duration_ms), count(*) FILTER (WHERE status_code >= 400)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2
               GROUP BY path, method ORDER BY count(*) DESC LIMIT $3"#,
        )
        .bind(start)
        .bind(end)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(endpoint, method, count, avg_duration_ms, error_count)| EndpointStats {
                endpoint,
                method,
                count,
                avg_duration_ms: avg_duration_ms.unwrap_or(0.0),
                error_count,
            })
            .collect())
    }

    async fn endpoint_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        endpoint: Option<&str>,
        method: Option<&str>,
    ) -> Result<Vec<EndpointStats>, StoreError> {
        let rows: Vec<(String, String, i64, Option<f64>, i64)> = sqlx::query_as(
            r#"SELECT path, method, count(*), avg(duration_ms), count(*) FILTER (WHERE status_code >= 400)
               FROM request_metrics
               WHERE timestamp BETWEEN $1 AND $2
                 AND ($3::text IS NULL OR path = $3)
                 AND ($4::text IS NULL OR method = $4)
               GROUP BY path, method ORDER BY path, method"#,
        )
        .bind(start)
        .bind(end)
        .bind(endpoint)
        .bind(method)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(endpoint, method, count, avg_duration_ms, error_count)| EndpointStats {
                endpoint,
                method,
                count,
                avg_duration_ms: avg_duration_ms.unwrap_or(0.0),
                error_count,
            })
            .collect())
    }

    async fn metric_value(
        &self,
        metric: &str,
        window_seconds: u64,
        endpoint: Option<&str>,
        backend: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let start = now - chrono::Duration::seconds(window_seconds as i64);
        match metric {
            "p95_latency" | "p99_latency" | "p50_latency" => {
                let pct = match metric {
                    "p50_latency" => 0.50,
                    "p99_latency" => 0.99,
                    _ => 0.95,
                };
                let row: (Option<f64>,) = sqlx::query_as(
                    r#"SELECT percentile_cont($4) WITHIN GROUP (ORDER BY duration_ms)
                       FROM request_metrics
                       WHERE timestamp BETWEEN $1 AND $2
                         AND ($3::text IS NULL OR path = $3)"#,
                )
                .bind(start)
                .bind(now)
                .bind(endpoint)
                .bind(pct)
                .fetch_one(&self.pool)
                .await?;
                Ok(row.0.unwrap_or(0.0))
            }
            "error_rate" => {
                let row: (i64, i64) = sqlx::query_as(
                    r#"SELECT count(*) FILTER (WHERE status_code >= 400), count(*)
                       FROM request_metrics
                       WHERE timestamp BETWEEN $1 AND $2
                         AND ($3::text IS NULL OR path = $3)"#,
                )
                .bind(start)
                .bind(now)
                .bind(endpoint)
                .fetch_one(&self.pool)
                .await?;
                Ok(if row.1 > 0 { row.0 as f64 / row.1 as f64 } else { 0.0 })
            }
            "request_rate" => {
                let row: (i64,) = sqlx::query_as(
                    r#"SELECT count(*) FROM request_metrics
                       WHERE timestamp BETWEEN $1 AND $2
                         AND ($3::text IS NULL OR path = $3)"#,
                )
                .bind(start)
                .bind(now)
                .bind(endpoint)
                .fetch_one(&self.pool)
                .await?;
                Ok(row.0 as f64 / window_seconds.max(1) as f64)
            }
            "backend_health" => {
                let row: (i64, i64) = sqlx::query_as(
                    r#"SELECT count(*) FILTER (WHERE healthy), count(*)
                       FROM backend_metrics
                       WHERE timestamp BETWEEN $1 AND $2
                         AND ($3::text IS NULL OR backend = $3)"#,
                )
                .bind(start)
                .bind(now)
                .bind(backend)
                .fetch_one(&self.pool)
                .await?;
                Ok(if row.1 > 0 { row.0 as f64 / row.1 as f64 } else { 1.0 })
            }
            other => Err(StoreError::Query(format!("unknown metric: {other}"))),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for table in ["request_metrics", "rate_limit_metrics", "backend_metrics"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < $1"))
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            total += result.rows_affected();
        }
        Ok(total)
    }
}

#[async_trait]
impl AlertStore for PostgresStore {
    async fn load_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as("SELECT document FROM alert_rules")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(doc,)| serde_json::from_value(doc).map_err(|e| StoreError::Query(e.to_string())))
            .collect()
    }

    async fn load_open_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT document FROM alerts WHERE status <> 'resolved'")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(doc,)| serde_json::from_value(doc).map_err(|e| StoreError::Query(e.to_string())))
            .collect()
    }

    async fn save_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let doc = serde_json::to_value(rule).map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query(
            r#"INSERT INTO alert_rules (id, document) VALUES ($1, $2)
               ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document"#,
        )
        .bind(&rule.id)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let doc = serde_json::to_value(alert).map_err(|e| StoreError::Query(e.to_string()))?;
        let status = match alert.status {
            crate::models::alert::AlertStatus::Active => "active",
            crate::models::alert::AlertStatus::Acknowledged => "acknowledged",
            crate::models::alert::AlertStatus::Resolved => "resolved",
            crate::models::alert::AlertStatus::Muted => "muted",
        };
        sqlx::query(
            r#"INSERT INTO alerts (id, rule_id, status, document) VALUES ($1, $2, $3, $4)
               ON CONFLICT (id) DO UPDATE SET rule_id = EXCLUDED.rule_id, status = EXCLUDED.status, document = EXCLUDED.document"#,
        )
        .bind(&alert.id)
        .bind(&alert.rule_id)
        .bind(status)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_history(&self, entry: &AlertHistoryEntry) -> Result<(), StoreError> {
        let doc = serde_json::to_value(entry).map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query(r#"INSERT INTO alert_history (alert_id, timestamp, document) VALUES ($1, $2, $3)"#)
            .bind(&entry.alert_id)
            .bind(entry.timestamp)
            .bind(doc)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_history(&self, alert_id: Option<&str>, limit: i64) -> Result<Vec<AlertHistoryEntry>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = match alert_id {
            Some(id) => {
                sqlx::query_as("SELECT document FROM alert_history WHERE alert_id = $1 ORDER BY timestamp DESC LIMIT $2")
                    .bind(id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT document FROM alert_history ORDER BY timestamp DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter()
            .map(|(doc,)| serde_json::from_value(doc).map_err(|e| StoreError::Query(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_distinguishes_unavailability() {
        let err = StoreError::Unavailable("connection refused".into());
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
