//! Rate limiter facade (spec.md §4.3).
//!
//! Ties bypass checking, tier resolution, rule matching and algorithm
//! dispatch into the single entry point the proxy pipeline calls once per
//! request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kv::KvStore;
use crate::models::context::{RequestContext, Tier};
use crate::models::rule::{Algorithm, RateLimitRule};
use crate::ratelimit::algorithms::fixed_window::FixedWindow;
use crate::ratelimit::algorithms::sliding_window_counter::SlidingWindowCounter;
use crate::ratelimit::algorithms::sliding_window_log::SlidingWindowLog;
use crate::ratelimit::algorithms::token_bucket::TokenBucket;
use crate::ratelimit::algorithms::{CheckResult, RateLimitAlgorithm};
use crate::ratelimit::rules::{build_key, check_bypass, scoped_key, BypassConfig, BypassDecision, KeyStrategy, RuleMatcher};

/// Looks up a tier override for an API key or user id, ahead of the
/// context's own (possibly default) tier.
#[derive(Debug, Clone, Default)]
pub struct TierResolver {
    pub api_key_tiers: HashMap<String, Tier>,
    pub user_tiers: HashMap<String, Tier>,
}

impl TierResolver {
    /// Explicit context tier wins if the caller already set one; otherwise
    /// an api-key or user mapping; otherwise the heuristic default
    /// (`Tier::Anonymous`).
    pub fn resolve(&self, ctx: &RequestContext) -> Tier {
        if ctx.tier != Tier::default() {
            return ctx.tier;
        }
        if let Some(api_key) = &ctx.api_key {
            if let Some(tier) = self.api_key_tiers.get(api_key) {
                return *tier;
            }
        }
        if let Some(user_id) = &ctx.user_id {
            if let Some(tier) = self.user_tiers.get(user_id) {
                return *tier;
            }
        }
        Tier::default()
    }
}

/// Outcome of a full rate-limit evaluation, covering both the bypass and
/// the algorithm-dispatch paths.
#[derive(Debug, Clone)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    pub window_seconds: u64,
    pub reset_at_ms: i64,
    pub retry_after: u64,
    pub fail_open: bool,
    pub bypassed: bool,
    pub bypass_reason: Option<&'static str>,
    pub matched_rule_id: Option<String>,
    pub tier: Tier,
    pub algorithm: Algorithm,
    /// The actual key the algorithm was checked against (post `build_key`/
    /// `scoped_key`), so callers can correlate metrics back to the bucket
    /// that was hit instead of re-deriving it from the request's IP.
    pub key: String,
}

impl LimitDecision {
    fn bypassed(decision: BypassDecision, tier: Tier, key: String) -> Self {
        Self {
            allowed: true,
            remaining: u64::MAX,
            limit: u64::MAX,
            window_seconds: 0,
            reset_at_ms: 0,
            retry_after: 0,
            fail_open: false,
            bypassed: true,
            bypass_reason: decision.reason,
            matched_rule_id: None,
            tier,
            algorithm: Algorithm::default(),
            key,
        }
    }

    fn from_check(
        result: CheckResult,
        window_seconds: u64,
        tier: Tier,
        algorithm: Algorithm,
        rule_id: Option<String>,
        key: String,
    ) -> Self {
        Self {
            allowed: result.allowed,
            remaining: result.remaining,
            limit: result.limit,
            window_seconds,
            reset_at_ms: result.reset_at_ms,
            retry_after: result.retry_after,
            fail_open: result.fail_open,
            bypassed: false,
            bypass_reason: None,
            matched_rule_id: rule_id,
            tier,
            algorithm,
            key,
        }
    }
}

pub struct RateLimiter {
    token_bucket: TokenBucket,
    sliding_window_log: SlidingWindowLog,
    sliding_window_counter: SlidingWindowCounter,
    fixed_window: FixedWindow,
    matcher: RuleMatcher,
    bypass: BypassConfig,
    tier_resolver: TierResolver,
    key_strategy: KeyStrategy,
}

impl RateLimiter {
    pub fn new(
        kv: Arc<dyn KvStore>,
        rules: Vec<RateLimitRule>,
        bypass: BypassConfig,
        tier_resolver: TierResolver,
        key_strategy: KeyStrategy,
    ) -> Self {
        Self {
            token_bucket: TokenBucket::new(kv.clone()),
            sliding_window_log: SlidingWindowLog::new(kv.clone()),
            sliding_window_counter: SlidingWindowCounter::new(kv.clone()),
            fixed_window: FixedWindow::new(kv),
            matcher: RuleMatcher::new(rules),
            bypass,
            tier_resolver,
            key_strategy,
        }
    }

    fn algorithm_for(&self, algorithm: Algorithm) -> &dyn RateLimitAlgorithm {
        match algorithm {
            Algorithm::TokenBucket => &self.token_bucket,
            Algorithm::SlidingWindowLog => &self.sliding_window_log,
            Algorithm::SlidingWindowCounter => &self.sliding_window_counter,
            Algorithm::FixedWindow => &self.fixed_window,
        }
    }

    /// Evaluates one request: bypass, tier resolution, rule match, effective
    /// limit computation (rule > tier > default), key construction and
    /// algorithm dispatch.
    pub async fn check(&self, ctx: &RequestContext) -> LimitDecision {
        let tier = self.tier_resolver.resolve(ctx);
        let base_key = build_key(ctx, self.key_strategy);

        let bypass_decision = check_bypass(ctx, &self.bypass);
        if bypass_decision.bypass {
            return LimitDecision::bypassed(bypass_decision, tier, base_key);
        }

        let matched_rule = self.matcher.match_rule(ctx);
        let (limit, window_seconds, algorithm) = match matched_rule {
            Some(rule) => (
                rule.rate_limit.requests,
                rule.rate_limit.window_seconds,
                rule.rate_limit.algorithm,
            ),
            None => (tier.default_requests_per_minute(), 60, Algorithm::default()),
        };

        let key = match matched_rule {
            Some(rule) => scoped_key(&rule.id, &base_key),
            None => base_key,
        };

        let result = self.algorithm_for(algorithm).check(&key, limit, window_seconds, 1).await;
        LimitDecision::from_check(
            result,
            window_seconds,
            tier,
            algorithm,
            matched_rule.map(|r| r.id.clone()),
            key,
        )
    }
}
