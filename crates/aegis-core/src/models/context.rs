//! Request context assembled once at the edge of the data plane.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization-derived quota bucket.
///
/// Determines default rate-limit quotas when no rule matches the request.
/// Always present on a [`RequestContext`]; defaults to `Anonymous` when
/// neither a user nor an API key resolves a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anonymous,
    Free,
    Basic,
    Pro,
    Enterprise,
    Unlimited,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl Tier {
    /// Default requests-per-minute quota for this tier, used when neither a
    /// rule nor an explicit override applies.
    pub fn default_requests_per_minute(&self) -> u64 {
        match self {
            Tier::Anonymous => 60,
            Tier::Free => 100,
            Tier::Basic => 500,
            Tier::Pro => 2_000,
            Tier::Enterprise => 10_000,
            Tier::Unlimited => 1_000_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
            Tier::Unlimited => "unlimited",
        }
    }
}

/// Case-insensitive header lookup over a request's headers.
///
/// Keys are stored lower-cased; construction normalizes whatever case the
/// transport layer handed us.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Value object assembled once at request entry and threaded through the
/// whole proxy pipeline.
///
/// `tier` is always present (see [`Tier::default`]); everything else is
/// optional and resolved from the trusted-proxy header policy, auth
/// metadata, or generated where absent (`request_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Canonicalized client address, honoring a trusted-proxy header policy.
    pub ip: String,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub tier: Tier,
    pub path: String,
    pub method: String,
    pub headers: Headers,
    pub request_id: String,
}

impl RequestContext {
    /// Builds a context, generating a request id when the caller did not
    /// already supply one via `X-Request-ID`.
    pub fn new(
        ip: String,
        path: String,
        method: String,
        headers: Headers,
        user_id: Option<String>,
        api_key: Option<String>,
        tier: Tier,
    ) -> Self {
        let request_id = headers
            .get("x-request-id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            ip,
            user_id,
            api_key,
            tier,
            path,
            method,
            headers,
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_defaults_to_anonymous() {
        assert_eq!(Tier::default(), Tier::Anonymous);
        assert_eq!(Tier::Anonymous.default_requests_per_minute(), 60);
        assert_eq!(Tier::Unlimited.default_requests_per_minute(), 1_000_000);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("X-User-Id", "alice");
        assert_eq!(headers.get("x-user-id"), Some("alice"));
        assert_eq!(headers.get("X-USER-ID"), Some("alice"));
    }

    #[test]
    fn request_id_is_generated_when_absent() {
        let ctx = RequestContext::new(
            "127.0.0.1".into(),
            "/api/x".into(),
            "GET".into(),
            Headers::new(),
            None,
            None,
            Tier::default(),
        );
        assert!(!ctx.request_id.is_empty());
    }

    #[test]
    fn request_id_is_honored_when_present() {
        let mut headers = Headers::new();
        headers.insert("x-request-id", "req-123");
        let ctx = RequestContext::new(
            "127.0.0.1".into(),
            "/api/x".into(),
            "GET".into(),
            headers,
            None,
            None,
            Tier::default(),
        );
        assert_eq!(ctx.request_id, "req-123");
    }
}
