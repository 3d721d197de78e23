//! Sliding-window counter rate limiter.
//!
//! Two adjacent integer counters (`prev`, `curr`) aligned to floor windows.
//! The weighted count `prev * (1 - progress) + curr` approximates a true
//! sliding window at O(1) memory; error is bounded by the ratio of progress
//! across a single window boundary (spec.md §8, property 3). TTL on `curr`
//! is `2 * window` so `prev` is retained long enough to contribute once it
//! rolls over.

use std::sync::Arc;

use async_trait::async_trait;

use crate::kv::KvStore;

use super::{fail_open, now_ms, CheckResult, RateLimitAlgorithm};

pub struct SlidingWindowCounter {
    kv: Arc<dyn KvStore>,
}

impl SlidingWindowCounter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn full_key(key: &str) -> String {
        format!("rl:swc:{key}")
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindowCounter {
    async fn check(&self, key: &str, limit: u64, window_seconds: u64, cost: u64) -> CheckResult {
        match self
            .kv
            .eval_sliding_window_counter(
                &Self::full_key(key),
                limit,
                window_seconds as i64,
                cost,
                now_ms(),
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

    struct FakeKv {
        counters: Mutex<std::collections::HashMap<i64, u64>>,
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
            let current_window = (now_sec / window_seconds as f64).floor() as i64;
            let progress = (now_sec - (current_window * window_seconds) as f64)
                / window_seconds as f64;

            let mut counters = self.counters.lock().unwrap();
            let prev = *counters.get(&(current_window - 1)).unwrap_or(&0);
            let curr = *counters.get(&current_window).unwrap_or(&0);
            let weighted = prev as f64 * (1.0 - progress) + curr as f64;

            let allowed = weighted + cost as f64 <= limit as f64;
            let new_curr = if allowed {
                let entry = counters.entry(current_window).or_insert(0);
                *entry += cost;
                *entry
            } else {
                curr
            };
            let new_weighted = prev as f64 * (1.0 - progress) + new_curr as f64;
            let reset_at_ms = (current_window + 1) * window_seconds * 1000;
            Ok(LimitOutcome {
                allowed,
                remaining: (limit as f64 - new_weighted).max(0.0) as u64,
                limit,
                reset_at_ms,
            })
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
            self.counters.lock().unwrap().clear();
            Ok(())
        }
    }

    fn limiter(fail: bool) -> SlidingWindowCounter {
        SlidingWindowCounter::new(Arc::new(FakeKv {
            counters: Mutex::new(std::collections::HashMap::new()),
            fail,
        }))
    }

    #[tokio::test]
    async fn admits_up_to_limit_within_a_window() {
        let limiter = limiter(false);
        let mut allowed = 0;
        for _ in 0..10 {
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
