//! Rate-limit rule definitions.
//!
//! A [`RateLimitRule`] pairs a set of match predicates with the effective
//! limit to apply when the predicates are satisfied. At most one rule is
//! selected per request — see [`crate::ratelimit::rules`] for the scoring
//! algorithm that picks it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Algorithm used to enforce a [`RateLimit`].
///
/// Falls back to [`Algorithm::SlidingWindowCounter`] when a rule specifies
/// an unrecognized name (open question (c) in spec.md §9): this balances
/// accuracy against memory and is the documented default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindowLog,
    SlidingWindowCounter,
    FixedWindow,
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::SlidingWindowCounter
    }
}

impl Algorithm {
    /// Key-prefix segment used to namespace this algorithm's KV store keys,
    /// preventing collisions between algorithms sharing a limiter key.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "tb",
            Algorithm::SlidingWindowLog => "swl",
            Algorithm::SlidingWindowCounter => "swc",
            Algorithm::FixedWindow => "fw",
        }
    }
}

/// How an endpoint match pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMatchType {
    Exact,
    Prefix,
    Glob,
    Regex,
}

impl EndpointMatchType {
    /// Base score contribution for a match of this type (spec.md §4.2).
    pub fn weight(&self) -> u32 {
        match self {
            EndpointMatchType::Exact => 100,
            EndpointMatchType::Prefix => 50,
            EndpointMatchType::Glob => 30,
            EndpointMatchType::Regex => 20,
        }
    }
}

/// Match predicates that select which requests a rule applies to.
///
/// Every predicate that is `Some`/non-empty must match for the rule to be a
/// candidate; a rule with no predicates set at all is a catch-all with a
/// base score of 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    pub endpoint: Option<String>,
    #[serde(default)]
    pub endpoint_match_type: Option<EndpointMatchType>,
    pub methods: Option<Vec<String>>,
    pub tiers: Option<Vec<String>>,
    pub user_ids: Option<Vec<String>>,
    pub ips: Option<Vec<String>>,
    pub api_keys: Option<Vec<String>>,
    pub headers: Option<Vec<(String, String)>>,
}

/// The effective limit applied once a rule is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub algorithm: Algorithm,
    pub requests: u64,
    pub window_seconds: u64,
}

/// A single rate-limit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    #[serde(rename = "match")]
    pub match_: RuleMatch,
    pub rate_limit: RateLimit,
    pub cooldown_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitRule {
    /// Whether this rule carries any match predicate at all. A rule with no
    /// predicates is a catch-all that scores 1 against any context.
    pub fn is_catch_all(&self) -> bool {
        let m = &self.match_;
        m.endpoint.is_none()
            && m.methods.is_none()
            && m.tiers.is_none()
            && m.user_ids.is_none()
            && m.ips.is_none()
            && m.api_keys.is_none()
            && m.headers.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_algorithm_falls_back_to_sliding_window_counter() {
        let deserialized: Result<Algorithm, _> = serde_json::from_str("\"leaky_bucket\"");
        assert!(deserialized.is_err());
        // Callers resolving from a freeform string (e.g. config loaded from
        // an external store) should fall back explicitly; see
        // `crate::ratelimit::rules::resolve_algorithm`.
        assert_eq!(Algorithm::default(), Algorithm::SlidingWindowCounter);
    }

    #[test]
    fn endpoint_match_weights_are_ordered() {
        assert!(EndpointMatchType::Exact.weight() > EndpointMatchType::Prefix.weight());
        assert!(EndpointMatchType::Prefix.weight() > EndpointMatchType::Glob.weight());
        assert!(EndpointMatchType::Glob.weight() > EndpointMatchType::Regex.weight());
    }

    #[test]
    fn catch_all_detection() {
        let rule = RateLimitRule {
            id: "r1".into(),
            name: "catch all".into(),
            enabled: true,
            priority: 0,
            match_: RuleMatch::default(),
            rate_limit: RateLimit {
                algorithm: Algorithm::FixedWindow,
                requests: 10,
                window_seconds: 60,
            },
            cooldown_seconds: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(rule.is_catch_all());
    }
}
