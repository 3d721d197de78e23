//! Fixed-window rate limiter.
//!
//! Simplest of the four algorithms: a single integer counter keyed by
//! `base:floor(now/window)`, incremented atomically with a TTL covering the
//! remaining seconds in the window. Permits up to 2x the limit across a
//! window boundary (spec.md §8, property 3) — acceptable given its minimal
//! memory footprint.

use std::sync::Arc;

use async_trait::async_trait;

use crate::kv::KvStore;

use super::{fail_open, now_ms, CheckResult, RateLimitAlgorithm};

pub struct FixedWindow {
    kv: Arc<dyn KvStore>,
}

impl FixedWindow {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn full_key(key: &str) -> String {
        format!("rl:fw:{key}")
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindow {
    async fn check(&self, key: &str, limit: u64, window_seconds: u64, cost: u64) -> CheckResult {
        match self
            .kv
            .eval_fixed_window(&Self::full_key(key), limit, window_seconds as i64, cost, now_ms())
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

    struct FakeKv {
        windows: Mutex<std::collections::HashMap<i64, u64>>,
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
            _: &str,
            _: u64,
            _: i64,
            _: u64,
            _: i64,
            _: &str,
        ) -> Result<LimitOutcome, KvError> {
            unimplemented!()
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
            _key: &str,
            limit: u64,
            window_seconds: i64,
            cost: u64,
            now_ms: i64,
        ) -> Result<LimitOutcome, KvError> {
            if self.fail {
                return Err(KvError::Unreachable("down".into()));
            }
            let now_sec = now_ms as f64 / 1000.0;
            let window_index = (now_sec / window_seconds as f64).floor() as i64;
            let mut windows = self.windows.lock().unwrap();
            let entry = windows.entry(window_index).or_insert(0);
            *entry += cost;
            let allowed = *entry <= limit;
            let reset_at_ms = (window_index + 1) * window_seconds * 1000;
            Ok(LimitOutcome {
                allowed,
                remaining: limit.saturating_sub(*entry),
                limit,
                reset_at_ms,
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), KvError> {
            self.windows.lock().unwrap().clear();
            Ok(())
        }
    }

    fn limiter(fail: bool) -> FixedWindow {
        FixedWindow::new(Arc::new(FakeKv {
            windows: Mutex::new(std::collections::HashMap::new()),
            fail,
        }))
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let limiter = limiter(false);
        let mut allowed = 0;
        for _ in 0..8 {
            if limiter.check("k", 5, 60, 1).await.allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn fails_open_when_kv_unreachable() {
        let limiter = limiter(true);
        let result = limiter.check("k", 5, 60, 1).await;
        assert!(result.allowed);
        assert!(result.fail_open);
    }
}
