//! Backend route resolution (spec.md §4.4), grounded in the teacher's
//! `utils::route_matcher::RouteMatcher`: static routes get an O(1) hash
//! lookup, dynamic routes (glob or `:name` patterns) compile to regex and
//! are tried in specificity order.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::HashMap as AHashMap;
use regex::Regex;

use crate::models::backend::Backend;

/// A resolved backend plus any named parameters captured from the path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub backend: Backend,
    pub params: HashMap<String, String>,
}

struct DynamicRoute {
    backend: Backend,
    regex: Arc<Regex>,
    param_names: Vec<String>,
    literal_prefix_len: usize,
    has_double_wildcard: bool,
}

/// Pattern-indexed route table built once from the configured backend list.
pub struct Router {
    static_routes: AHashMap<String, Backend>,
    dynamic_routes: Vec<DynamicRoute>,
}

impl Router {
    /// Builds the index. Disabled backends are skipped entirely.
    pub fn new(backends: Vec<Backend>) -> Result<Self, String> {
        let mut static_routes = AHashMap::default();
        let mut dynamic_routes = Vec::new();

        for backend in backends {
            if !backend.enabled {
                continue;
            }
            for pattern in &backend.routes {
                if is_static(pattern) {
                    static_routes.insert(normalize_path(pattern), backend.clone());
                } else {
                    dynamic_routes.push(compile_route(pattern, backend.clone())?);
                }
            }
        }

        // Longer literal prefix wins; among equal prefixes, a single
        // wildcard is more specific than a double wildcard.
        dynamic_routes.sort_by(|a, b| {
            b.literal_prefix_len
                .cmp(&a.literal_prefix_len)
                .then(a.has_double_wildcard.cmp(&b.has_double_wildcard))
        });

        Ok(Self {
            static_routes,
            dynamic_routes,
        })
    }

    /// Resolves the most specific backend for `raw_path`, normalizing the
    /// path first (collapsed slashes, stripped query string, canonicalized
    /// trailing slash).
    pub fn match_path(&self, raw_path: &str) -> Option<RouteMatch> {
        let path = normalize_path(raw_path);

        if let Some(backend) = self.static_routes.get(&path) {
            return Some(RouteMatch {
                backend: backend.clone(),
                params: HashMap::new(),
            });
        }

        for route in &self.dynamic_routes {
            if let Some(captures) = route.regex.captures(&path) {
                let mut params = HashMap::with_capacity(route.param_names.len());
                for (i, name) in route.param_names.iter().enumerate() {
                    if let Some(value) = captures.get(i + 1) {
                        params.insert(name.clone(), value.as_str().to_string());
                    }
                }
                return Some(RouteMatch {
                    backend: route.backend.clone(),
                    params,
                });
            }
        }

        None
    }
}

fn is_static(pattern: &str) -> bool {
    !pattern.contains(':') && !pattern.contains('*')
}

fn literal_prefix_len(pattern: &str) -> usize {
    pattern.find([':', '*']).unwrap_or(pattern.len())
}

fn normalize_path(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or("");
    let mut collapsed = String::with_capacity(without_query.len());
    let mut last_was_slash = false;
    for ch in without_query.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(ch);
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    if collapsed.is_empty() {
        "/".to_string()
    } else {
        collapsed
    }
}

fn compile_route(pattern: &str, backend: Backend) -> Result<DynamicRoute, String> {
    let literal_prefix_len = literal_prefix_len(pattern);
    let mut has_double_wildcard = false;
    let mut param_names = Vec::new();
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 2);
    regex_str.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ':' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '/' {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(format!("invalid named parameter in pattern: {pattern}"));
                }
                param_names.push(name);
                regex_str.push_str("([^/]+)");
            }
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    has_double_wildcard = true;
                    regex_str.push_str(".*");
                } else {
                    regex_str.push_str("[^/]*");
                }
            }
            '.' | '+' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' | '?' => {
                regex_str.push('\\');
                regex_str.push(ch);
            }
            _ => regex_str.push(ch),
        }
    }
    regex_str.push('$');

    let regex = Regex::new(&regex_str).map_err(|e| format!("invalid route pattern {pattern}: {e}"))?;
    Ok(DynamicRoute {
        backend,
        regex: Arc::new(regex),
        param_names,
        literal_prefix_len,
        has_double_wildcard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, routes: &[&str]) -> Backend {
        Backend {
            name: name.to_string(),
            url: format!("http://{name}:8080"),
            routes: routes.iter().map(|s| s.to_string()).collect(),
            health_check_path: "/health".to_string(),
            health_check_interval_ms: 5_000,
            timeout_ms: 2_000,
            retry_attempts: 2,
            weight: 1,
            enabled: true,
        }
    }

    #[test]
    fn static_route_matches_exactly() {
        let router = Router::new(vec![backend("orders", &["/api/orders"])]).unwrap();
        let matched = router.match_path("/api/orders").unwrap();
        assert_eq!(matched.backend.name, "orders");
    }

    #[test]
    fn named_parameter_is_captured() {
        let router = Router::new(vec![backend("users", &["/api/users/:id"])]).unwrap();
        let matched = router.match_path("/api/users/42").unwrap();
        assert_eq!(matched.params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn path_is_normalized_before_matching() {
        let router = Router::new(vec![backend("orders", &["/api/orders"])]).unwrap();
        assert!(router.match_path("/api//orders/?foo=bar").is_some());
        assert!(router.match_path("/api/orders/").is_some());
    }

    #[test]
    fn longer_literal_prefix_wins_over_shorter() {
        let router = Router::new(vec![
            backend("catch-all", &["/api/*"]),
            backend("orders", &["/api/orders/*"]),
        ])
        .unwrap();
        let matched = router.match_path("/api/orders/42").unwrap();
        assert_eq!(matched.backend.name, "orders");
    }

    #[test]
    fn single_wildcard_outranks_double_wildcard_at_equal_prefix() {
        let router = Router::new(vec![
            backend("deep", &["/api/**"]),
            backend("shallow", &["/api/*"]),
        ])
        .unwrap();
        let matched = router.match_path("/api/orders").unwrap();
        assert_eq!(matched.backend.name, "shallow");
    }

    #[test]
    fn double_wildcard_still_matches_nested_paths() {
        let router = Router::new(vec![backend("deep", &["/api/**"])]).unwrap();
        assert!(router.match_path("/api/orders/42/items").is_some());
    }

    #[test]
    fn disabled_backend_is_never_matched() {
        let mut b = backend("orders", &["/api/orders"]);
        b.enabled = false;
        let router = Router::new(vec![b]).unwrap();
        assert!(router.match_path("/api/orders").is_none());
    }
}
