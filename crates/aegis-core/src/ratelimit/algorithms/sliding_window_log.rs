//! Sliding-window log rate limiter.
//!
//! State is an ordered set of `(score=timestampMs, member)` entries. Highest
//! accuracy of the four algorithms, at the cost of memory proportional to
//! the limit. Members are tagged with a per-insert suffix so a single check
//! with `cost > 1` inserts `cost` distinct members — this is required for
//! the weighted-count testable property to hold (spec.md §9, open question a).

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::kv::KvStore;

use super::{fail_open, now_ms, CheckResult, RateLimitAlgorithm};

pub struct SlidingWindowLog {
    kv: Arc<dyn KvStore>,
}

impl SlidingWindowLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn full_key(key: &str) -> String {
        format!("rl:swl:{key}")
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowLog {
    async fn check(&self, key: &str, limit: u64, window_seconds: u64, cost: u64) -> CheckResult {
        let window_ms = (window_seconds as i64) * 1000;
        let member_prefix = Uuid::new_v4().to_string();

        match self
            .kv
            .eval_sliding_window_log(
                &Self::full_key(key),
                limit,
                window_ms,
                cost,
                now_ms(),
                &member_prefix,
            )
            .await
        {
            Ok(outcome) => {
                let retry_after = if outcome.allowed {
                    0
                } else {
                    ((outcome.reset_at_ms - now_ms()).max(0) as u64).div_ceil(1000)
                };
                CheckResult {
                    allowed: outcome.allowed,
                    remaining: outcome.remaining,
                    limit: outcome.limit,
                    reset_at_ms: outcome.reset_at_ms,
                    retry_after,
                    fail_open: false,
                }
            }
            Err(e) => fail_open(&e, limit),
        }
    }

    async fn reset(&self, key: &str) {
        let _ = self.kv.delete(&Self::full_key(key)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvError, LimitOutcome};
    use std::sync::Mutex;

    /// Fake replicating the sorted-set semantics of the Lua script.
    struct FakeKv {
        entries: Mutex<Vec<i64>>,
        fail: bool,
    }

    #[async_trait]
    impl KvStore for FakeKv {
        async fn eval_token_bucket(
            &self,
            _: &str,
            _: f64,
            _: f64,
            _: f64,
            _: i64,
            _: i64,
        ) -> Result<LimitOutcome, KvError> {
            unimplemented!()
        }

        async fn eval_sliding_window_log(
            &self,
            _key: &str,
            limit: u64,
            window_ms: i64,
            cost: u64,
            now_ms: i64,
            _member_prefix: &str,
        ) -> Result<LimitOutcome, KvError> {
            if self.fail {
                return Err(KvError::Unreachable("down".into()));
            }
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|&ts| ts >= now_ms - window_ms);
            let count = entries.len() as u64;
            let allowed = count + cost <= limit;
            if allowed {
                for _ in 0..cost {
                    entries.push(now_ms);
                }
            }
            let new_count = entries.len() as u64;
            let reset_at_ms = entries.first().copied().unwrap_or(now_ms) + window_ms;
            Ok(LimitOutcome {
                allowed,
                remaining: limit.saturating_sub(new_count),
                limit,
                reset_at_ms,
            })
        }

        async fn eval_sliding_window_counter(
            &self,
            _: &str,
            _: u64,
            _: i64,
            _: u64,
            _: i64,
        ) -> Result<LimitOutcome, KvError> {
            unimplemented!()
        }

        async fn eval_fixed_window(
            &self,
            _: &str,
            _: u64,
            _: i64,
            _: u64,
            _: i64,
        ) -> Result<LimitOutcome, KvError> {
            unimplemented!()
        }

        async fn delete(&self, _key: &str) -> Result<(), KvError> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    fn limiter(fail: bool) -> SlidingWindowLog {
        SlidingWindowLog::new(Arc::new(FakeKv {
            entries: Mutex::new(Vec::new()),
            fail,
        }))
    }

    #[tokio::test]
    async fn never_admits_more_than_limit_in_any_window() {
        // windowMs=1000, limit=5; five fast requests allow, a sixth denies.
        let limiter = limiter(false);
        let mut allowed_count = 0;
        for _ in 0..5 {
            if limiter.check("k", 5, 1, 1).await.allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 5);
        assert!(!limiter.check("k", 5, 1, 1).await.allowed);
    }

    #[tokio::test]
    async fn fails_open_when_kv_unreachable() {
        let limiter = limiter(true);
        let result = limiter.check("k", 5, 1, 1).await;
        assert!(result.allowed);
        assert!(result.fail_open);
    }
}
