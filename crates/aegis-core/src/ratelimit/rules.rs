//! Rule matching and bypass evaluation.
//!
//! Two independent decisions happen before a request reaches an algorithm:
//! a bypass check (does this request skip rate limiting entirely?) and a
//! rule match (which configured [`RateLimitRule`] applies, if any?). Both are
//! pure functions over a [`RequestContext`] and read-only configuration, so
//! they can be exercised without a live KV store.

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use regex::Regex;

use crate::models::context::RequestContext;
use crate::models::rule::{Algorithm, EndpointMatchType, RateLimitRule};

/// CIDR ranges considered "internal" for the internal-range bypass.
const INTERNAL_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::1/128",
    "fc00::/7",
];

const WEIGHT_METHOD: u32 = 10;
const WEIGHT_TIER: u32 = 10;
const WEIGHT_USER_ID: u32 = 15;
const WEIGHT_IP: u32 = 15;
const WEIGHT_API_KEY: u32 = 15;
const WEIGHT_HEADER: u32 = 5;

/// Whitelists consulted ahead of rule matching. An empty config bypasses
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct BypassConfig {
    pub ip_whitelist: Vec<String>,
    pub allow_internal: bool,
    pub user_id_whitelist: Vec<String>,
    pub api_key_whitelist: Vec<String>,
    pub path_whitelist: Vec<String>,
}

/// Outcome of a bypass check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassDecision {
    pub bypass: bool,
    pub reason: Option<&'static str>,
    pub detail: Option<String>,
}

impl BypassDecision {
    fn no() -> Self {
        Self {
            bypass: false,
            reason: None,
            detail: None,
        }
    }

    fn yes(reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            bypass: true,
            reason: Some(reason),
            detail: Some(detail.into()),
        }
    }
}

/// Runs the bypass precedence chain: IP whitelist, then internal range (if
/// enabled), then userId, then apiKey, then path glob whitelist. The first
/// hit wins.
pub fn check_bypass(ctx: &RequestContext, config: &BypassConfig) -> BypassDecision {
    if config.ip_whitelist.iter().any(|cidr| ip_in_cidr(&ctx.ip, cidr)) {
        return BypassDecision::yes("ip_whitelist", ctx.ip.clone());
    }
    if config.allow_internal && INTERNAL_RANGES.iter().any(|cidr| ip_in_cidr(&ctx.ip, cidr)) {
        return BypassDecision::yes("internal_range", ctx.ip.clone());
    }
    if let Some(user_id) = &ctx.user_id {
        if config.user_id_whitelist.iter().any(|u| u == user_id) {
            return BypassDecision::yes("user_id_whitelist", user_id.clone());
        }
    }
    if let Some(api_key) = &ctx.api_key {
        if config
            .api_key_whitelist
            .iter()
            .any(|pattern| glob_match(pattern, api_key))
        {
            return BypassDecision::yes("api_key_whitelist", api_key.clone());
        }
    }
    if config
        .path_whitelist
        .iter()
        .any(|pattern| glob_match(pattern, &ctx.path))
    {
        return BypassDecision::yes("path_whitelist", ctx.path.clone());
    }
    BypassDecision::no()
}

/// Normalizes an IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) to its IPv4
/// form before CIDR comparison; other addresses pass through unchanged.
fn normalize_ip(ip: &str) -> Option<IpAddr> {
    let parsed: IpAddr = ip.parse().ok()?;
    match parsed {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).or(Some(IpAddr::V6(v6))),
        v4 => Some(v4),
    }
}

/// Returns `true` if `ip` falls inside `cidr` (or equals `cidr` when it
/// carries no `/n` suffix). Malformed input never matches.
fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let Some(addr) = normalize_ip(ip) else {
        return false;
    };
    let network = if cidr.contains('/') {
        IpNetwork::from_str(cidr)
    } else {
        IpNetwork::from_str(&format!(
            "{cidr}/{}",
            if cidr.contains(':') { 128 } else { 32 }
        ))
    };
    match network {
        Ok(network) => network.contains(addr),
        Err(_) => false,
    }
}

/// Converts a glob pattern (`*` within a segment, `**` across segments, `?`
/// one character) into an anchored regex and tests it against `text`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let Some(regex) = compile_glob(pattern) else {
        return false;
    };
    regex.is_match(text)
}

fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// Strategy for constructing a rate-limit key from a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    Ip,
    User,
    ApiKey,
    IpEndpoint,
    UserEndpoint,
    #[default]
    Composite,
}

/// Builds the base limiter key (before any rule-id prefix is applied).
pub fn build_key(ctx: &RequestContext, strategy: KeyStrategy) -> String {
    match strategy {
        KeyStrategy::Ip => ctx.ip.clone(),
        KeyStrategy::User => ctx.user_id.clone().unwrap_or_else(|| ctx.ip.clone()),
        KeyStrategy::ApiKey => ctx.api_key.clone().unwrap_or_else(|| ctx.ip.clone()),
        KeyStrategy::IpEndpoint => format!("{}:{}", ctx.ip, ctx.path),
        KeyStrategy::UserEndpoint => {
            let who = ctx.user_id.clone().unwrap_or_else(|| ctx.ip.clone());
            format!("{who}:{}", ctx.path)
        }
        KeyStrategy::Composite => {
            let who = ctx.user_id.clone().unwrap_or_else(|| ctx.ip.clone());
            let key_part = ctx
                .api_key
                .as_ref()
                .map(|k| k.chars().take(8).collect::<String>())
                .unwrap_or_default();
            format!("{who}:{key_part}:{}", ctx.tier.as_str())
        }
    }
}

/// Prefixes a matched rule's id onto a base key so rule-scoped counters are
/// isolated from global ones.
pub fn scoped_key(rule_id: &str, base_key: &str) -> String {
    format!("{rule_id}:{base_key}")
}

/// Resolves a freeform algorithm name (e.g. loaded from an external store)
/// to an [`Algorithm`], falling back to the default when unrecognized.
pub fn resolve_algorithm(name: &str) -> Algorithm {
    match name.to_ascii_lowercase().as_str() {
        "token_bucket" | "tokenbucket" => Algorithm::TokenBucket,
        "sliding_window_log" | "slidingwindowlog" => Algorithm::SlidingWindowLog,
        "sliding_window_counter" | "slidingwindowcounter" => Algorithm::SlidingWindowCounter,
        "fixed_window" | "fixedwindow" => Algorithm::FixedWindow,
        _ => Algorithm::default(),
    }
}

fn endpoint_matches(pattern: &str, match_type: EndpointMatchType, path: &str) -> bool {
    match match_type {
        EndpointMatchType::Exact => pattern == path,
        EndpointMatchType::Prefix => path.starts_with(pattern),
        EndpointMatchType::Glob => glob_match(pattern, path),
        EndpointMatchType::Regex => Regex::new(pattern).map(|r| r.is_match(path)).unwrap_or(false),
    }
}

/// Scans enabled rules for the best match against a request context.
///
/// Rules are pre-sorted by priority (descending) at construction so that,
/// once scoring is done, the first rule encountered among equal top scores
/// is already the highest-priority one.
pub struct RuleMatcher {
    rules: Vec<RateLimitRule>,
}

impl RuleMatcher {
    pub fn new(mut rules: Vec<RateLimitRule>) -> Self {
        rules.retain(|r| r.enabled);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// Returns the highest-scoring rule, if any predicate set matches.
    pub fn match_rule(&self, ctx: &RequestContext) -> Option<&RateLimitRule> {
        let mut best: Option<(&RateLimitRule, u32)> = None;
        for rule in &self.rules {
            let Some(score) = Self::score(rule, ctx) else {
                continue;
            };
            match &best {
                Some((_, best_score)) if *best_score >= score => {}
                _ => best = Some((rule, score)),
            }
        }
        best.map(|(rule, _)| rule)
    }

    fn score(rule: &RateLimitRule, ctx: &RequestContext) -> Option<u32> {
        if rule.is_catch_all() {
            return Some(1);
        }
        let m = &rule.match_;
        let mut score = 0u32;

        if let Some(endpoint) = &m.endpoint {
            let match_type = m.endpoint_match_type.unwrap_or(EndpointMatchType::Exact);
            if !endpoint_matches(endpoint, match_type, &ctx.path) {
                return None;
            }
            let depth = ctx.path.matches('/').count() as u32;
            score += match_type.weight() + depth;
        }
        if let Some(methods) = &m.methods {
            if !methods.iter().any(|method| method.eq_ignore_ascii_case(&ctx.method)) {
                return None;
            }
            score += WEIGHT_METHOD;
        }
        if let Some(tiers) = &m.tiers {
            if !tiers.iter().any(|t| t == ctx.tier.as_str()) {
                return None;
            }
            score += WEIGHT_TIER;
        }
        if let Some(user_ids) = &m.user_ids {
            let Some(user_id) = &ctx.user_id else {
                return None;
            };
            if !user_ids.iter().any(|u| u == user_id) {
                return None;
            }
            score += WEIGHT_USER_ID;
        }
        if let Some(ips) = &m.ips {
            if !ips.iter().any(|cidr| ip_in_cidr(&ctx.ip, cidr)) {
                return None;
            }
            score += WEIGHT_IP;
        }
        if let Some(api_keys) = &m.api_keys {
            let Some(api_key) = &ctx.api_key else {
                return None;
            };
            if !api_keys.iter().any(|pattern| glob_match(pattern, api_key)) {
                return None;
            }
            score += WEIGHT_API_KEY;
        }
        if let Some(headers) = &m.headers {
            for (name, value) in headers {
                match ctx.headers.get(name) {
                    Some(actual) if actual == value => score += WEIGHT_HEADER,
                    _ => return None,
                }
            }
        }
        Some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context::RequestContext;
    use crate::models::rule::{RateLimit, RuleMatch};
    use chrono::Utc;

    fn ctx(path: &str, ip: &str) -> RequestContext {
        RequestContext::new(
            ip.to_string(),
            path.to_string(),
            "GET".to_string(),
            Default::default(),
            None,
            None,
            Default::default(),
        )
    }

    fn rule(id: &str, priority: i32, match_: RuleMatch) -> RateLimitRule {
        RateLimitRule {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            priority,
            match_,
            rate_limit: RateLimit {
                algorithm: Algorithm::FixedWindow,
                requests: 10,
                window_seconds: 60,
            },
            cooldown_seconds: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn internal_range_bypasses_when_enabled() {
        let config = BypassConfig {
            allow_internal: true,
            ..Default::default()
        };
        let decision = check_bypass(&ctx("/x", "10.1.2.3"), &config);
        assert!(decision.bypass);
        assert_eq!(decision.reason, Some("internal_range"));
    }

    #[test]
    fn public_ip_does_not_bypass() {
        let config = BypassConfig {
            allow_internal: true,
            ..Default::default()
        };
        let decision = check_bypass(&ctx("/x", "8.8.8.8"), &config);
        assert!(!decision.bypass);
    }

    #[test]
    fn ip_whitelist_takes_precedence_over_internal() {
        let config = BypassConfig {
            ip_whitelist: vec!["8.8.8.8/32".to_string()],
            allow_internal: true,
            ..Default::default()
        };
        let decision = check_bypass(&ctx("/x", "8.8.8.8"), &config);
        assert_eq!(decision.reason, Some("ip_whitelist"));
    }

    #[test]
    fn glob_double_star_matches_across_segments() {
        assert!(glob_match("/admin/**", "/admin/users/42"));
        assert!(!glob_match("/admin/*", "/admin/users/42"));
    }

    #[test]
    fn more_specific_rule_outscores_catch_all() {
        let catch_all = rule("catch-all", 0, RuleMatch::default());
        let specific = rule(
            "specific",
            0,
            RuleMatch {
                endpoint: Some("/api/orders".to_string()),
                endpoint_match_type: Some(EndpointMatchType::Exact),
                ..Default::default()
            },
        );
        let matcher = RuleMatcher::new(vec![catch_all, specific]);
        let matched = matcher.match_rule(&ctx("/api/orders", "1.2.3.4")).unwrap();
        assert_eq!(matched.id, "specific");
    }

    #[test]
    fn ties_break_by_priority() {
        let low = rule(
            "low",
            0,
            RuleMatch {
                methods: Some(vec!["GET".to_string()]),
                ..Default::default()
            },
        );
        let high = rule(
            "high",
            5,
            RuleMatch {
                methods: Some(vec!["GET".to_string()]),
                ..Default::default()
            },
        );
        let matcher = RuleMatcher::new(vec![low, high]);
        let matched = matcher.match_rule(&ctx("/any", "1.2.3.4")).unwrap();
        assert_eq!(matched.id, "high");
    }

    #[test]
    fn non_matching_predicate_excludes_rule() {
        let rule = rule(
            "post-only",
            0,
            RuleMatch {
                methods: Some(vec!["POST".to_string()]),
                ..Default::default()
            },
        );
        let matcher = RuleMatcher::new(vec![rule]);
        assert!(matcher.match_rule(&ctx("/any", "1.2.3.4")).is_none());
    }

    #[test]
    fn unknown_algorithm_name_resolves_to_default() {
        assert_eq!(resolve_algorithm("leaky_bucket"), Algorithm::default());
        assert_eq!(resolve_algorithm("token_bucket"), Algorithm::TokenBucket);
    }

    #[test]
    fn composite_key_combines_user_key_and_tier() {
        let mut context = ctx("/x", "1.2.3.4");
        context.user_id = Some("user-42".to_string());
        context.api_key = Some("sk-abcdefghij".to_string());
        let key = build_key(&context, KeyStrategy::Composite);
        assert_eq!(key, "user-42:sk-abcdefg:anonymous");
    }
}
