//! Four independent rate-limit algorithms sharing a common contract
//! (spec.md §4.1).
//!
//! All four delegate their atomic state mutation to the KV store (one
//! server-side script per algorithm — see [`crate::kv`]) and share the same
//! fail-open behavior: if the KV store is unreachable, `check` returns
//! `allowed=true` with `remaining=limit` rather than blocking traffic. This
//! is a deliberate availability choice (spec.md §4.1, §7) and is surfaced in
//! metrics so operators can detect prolonged outages.

pub mod fixed_window;
pub mod sliding_window_counter;
pub mod sliding_window_log;
pub mod token_bucket;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;

use crate::kv::{KvError, KvStore};

/// Result of a rate-limit decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    /// Unix millis at which the limiter resets (bucket refills / window rolls).
    pub reset_at_ms: i64,
    /// Seconds the caller should wait before retrying; only meaningful when denied.
    pub retry_after: u64,
    /// Set when this result was produced by the fail-open path rather than a
    /// real KV store decision.
    pub fail_open: bool,
}

/// Shared contract every rate-limit algorithm implements.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync {
    async fn check(&self, key: &str, limit: u64, window_seconds: u64, cost: u64) -> CheckResult;
    async fn reset(&self, key: &str);
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builds the fail-open [`CheckResult`] used whenever the KV store errors.
pub(crate) fn fail_open(err: &KvError, limit: u64) -> CheckResult {
    warn!("rate limit KV store unreachable, failing open: {err}");
    CheckResult {
        allowed: true,
        remaining: limit,
        limit,
        reset_at_ms: now_ms(),
        retry_after: 0,
        fail_open: true,
    }
}
