//! Token bucket rate limiter.
//!
//! State `{tokens, last_refill_ms}` with invariant `0 ≤ tokens ≤ max_tokens`.
//! On each check, tokens refill at `limit / window_seconds` per second up to
//! `max_tokens`, then `cost` tokens are withdrawn if available.

use std::sync::Arc;

use async_trait::async_trait;

use crate::kv::KvStore;

use super::{fail_open, now_ms, CheckResult, RateLimitAlgorithm};

pub struct TokenBucket {
    kv: Arc<dyn KvStore>,
}

impl TokenBucket {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn full_key(key: &str) -> String {
        format!("rl:tb:{key}")
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    async fn check(&self, key: &str, limit: u64, window_seconds: u64, cost: u64) -> CheckResult {
        let max_tokens = limit as f64;
        let refill_rate = limit as f64 / window_seconds.max(1) as f64;
        let ttl = (window_seconds as i64 + 1).max(1);

        match self
            .kv
            .eval_token_bucket(
                &Self::full_key(key),
                max_tokens,
                refill_rate,
                cost as f64,
                now_ms(),
                ttl,
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
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// In-memory fake replicating the Lua script's arithmetic so the
    /// algorithm's wrapper logic (retry-after, fail-open translation) can be
    /// tested without a live Redis server.
    struct FakeKv {
        tokens: Mutex<f64>,
        last_refill_ms: AtomicI64,
        max_tokens: f64,
        refill_rate: f64,
        fail: bool,
    }

    #[async_trait]
    impl KvStore for FakeKv {
        async fn eval_token_bucket(
            &self,
            _key: &str,
            max_tokens: f64,
            refill_rate: f64,
            cost: f64,
            now_ms: i64,
            _ttl: i64,
        ) -> Result<LimitOutcome, KvError> {
            if self.fail {
                return Err(KvError::Unreachable("down".into()));
            }
            let mut tokens = self.tokens.lock().unwrap();
            let last = self.last_refill_ms.swap(now_ms, Ordering::SeqCst);
            let elapsed_sec = ((now_ms - last).max(0) as f64) / 1000.0;
            *tokens = (*tokens + elapsed_sec * refill_rate).min(max_tokens);
            let allowed = *tokens >= cost;
            if allowed {
                *tokens -= cost;
            }
            let deficit = max_tokens - *tokens;
            let seconds_to_full = if refill_rate > 0.0 { deficit / refill_rate } else { 0.0 };
            Ok(LimitOutcome {
                allowed,
                remaining: tokens.floor() as u64,
                limit: max_tokens as u64,
                reset_at_ms: now_ms + (seconds_to_full * 1000.0) as i64,
            })
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
            _: &str,
            _: u64,
            _: i64,
            _: u64,
            _: i64,
        ) -> Result<LimitOutcome, KvError> {
            unimplemented!()
        }

        async fn delete(&self, _key: &str) -> Result<(), KvError> {
            Ok(())
        }
    }

    fn bucket(max_tokens: f64, refill_rate: f64, fail: bool) -> TokenBucket {
        TokenBucket::new(Arc::new(FakeKv {
            tokens: Mutex::new(max_tokens),
            last_refill_ms: AtomicI64::new(now_ms()),
            max_tokens,
            refill_rate,
            fail,
        }))
    }

    #[tokio::test]
    async fn burst_then_deny_matches_scenario_1() {
        // maxTokens=5, refillRate=1/s; 7 checks at t=0 → [t,t,t,t,t,f,f]
        let bucket = bucket(5.0, 1.0, false);
        let mut allowed = Vec::new();
        let mut remaining = Vec::new();
        for _ in 0..7 {
            let r = bucket.check("k", 5, 5, 1).await;
            allowed.push(r.allowed);
            remaining.push(r.remaining);
        }
        assert_eq!(allowed, vec![true, true, true, true, true, false, false]);
        assert_eq!(remaining[..5], [4, 3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn fails_open_when_kv_unreachable() {
        let bucket = bucket(5.0, 1.0, true);
        let result = bucket.check("k", 5, 5, 1).await;
        assert!(result.allowed);
        assert!(result.fail_open);
        assert_eq!(result.remaining, 5);
    }
}
