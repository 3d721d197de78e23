//! Append-only metric record types persisted by the [`crate::metrics`] collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One proxied request's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub user_id: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub backend: Option<String>,
    pub bytes_in: Option<u64>,
    pub bytes_out: Option<u64>,
    pub error: Option<String>,
    pub rate_limited: bool,
    pub cached: bool,
    pub tier: Option<String>,
}

/// One rate-limit decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitMetric {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub endpoint: String,
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    pub user_id: Option<String>,
    pub ip: String,
    pub tier: Option<String>,
    pub algorithm: String,
}

/// One backend health probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetric {
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// A time range over which metrics are aggregated; either a named preset or
/// an explicit `{start, end}` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MetricRange {
    Preset(RangePreset),
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePreset {
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    SixHours,
    TwentyFourHours,
    SevenDays,
    ThirtyDays,
}

impl RangePreset {
    pub fn duration(&self) -> chrono::Duration {
        use chrono::Duration;
        match self {
            RangePreset::FiveMinutes => Duration::minutes(5),
            RangePreset::FifteenMinutes => Duration::minutes(15),
            RangePreset::OneHour => Duration::hours(1),
            RangePreset::SixHours => Duration::hours(6),
            RangePreset::TwentyFourHours => Duration::hours(24),
            RangePreset::SevenDays => Duration::days(7),
            RangePreset::ThirtyDays => Duration::days(30),
        }
    }

    /// Parse the preset strings accepted on the wire (`5m`, `15m`, `1h`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            "1h" => Some(Self::OneHour),
            "6h" => Some(Self::SixHours),
            "24h" => Some(Self::TwentyFourHours),
            "7d" => Some(Self::SevenDays),
            "30d" => Some(Self::ThirtyDays),
            _ => None,
        }
    }
}

impl MetricRange {
    /// Resolves the range to a concrete `(start, end)` pair anchored at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            MetricRange::Preset(p) => (now - p.duration(), now),
            MetricRange::Custom { start, end } => (*start, *end),
        }
    }

    /// Bucket width the collector should use for series queries over this
    /// range (spec.md §4.8: `1h → 1m`, `24h → 15m`, `7d → 1h`, ...).
    pub fn bucket_width(&self) -> chrono::Duration {
        use chrono::Duration;
        let span = match self {
            MetricRange::Preset(p) => p.duration(),
            MetricRange::Custom { start, end } => *end - *start,
        };
        if span <= Duration::minutes(15) {
            Duration::seconds(10)
        } else if span <= Duration::hours(1) {
            Duration::minutes(1)
        } else if span <= Duration::hours(6) {
            Duration::minutes(5)
        } else if span <= Duration::hours(24) {
            Duration::minutes(15)
        } else if span <= Duration::days(7) {
            Duration::hours(1)
        } else {
            Duration::hours(6)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_parsing_round_trips_known_values() {
        for raw in ["5m", "15m", "1h", "6h", "24h", "7d", "30d"] {
            assert!(RangePreset::parse(raw).is_some(), "{raw} should parse");
        }
        assert!(RangePreset::parse("3w").is_none());
    }

    #[test]
    fn bucket_width_scales_with_span() {
        assert_eq!(
            MetricRange::Preset(RangePreset::OneHour).bucket_width(),
            chrono::Duration::minutes(1)
        );
        assert_eq!(
            MetricRange::Preset(RangePreset::TwentyFourHours).bucket_width(),
            chrono::Duration::minutes(15)
        );
        assert_eq!(
            MetricRange::Preset(RangePreset::SevenDays).bucket_width(),
            chrono::Duration::hours(1)
        );
    }

    #[test]
    fn custom_range_resolves_verbatim() {
        let now = Utc::now();
        let start = now - chrono::Duration::hours(2);
        let range = MetricRange::Custom { start, end: now };
        assert_eq!(range.resolve(now), (start, now));
    }
}
