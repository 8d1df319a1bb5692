//! Route matching for HTTP requests (spec §4.C), generalizing the teacher's
//! single `starts_with(prefix)` scan in `proxy/forwarding.rs::pick_route`
//! into the full host → method → required-headers → longest-prefix chain
//! the new multi-route model needs.

use crate::config::{HttpRoute, HttpRule};
use http::{HeaderMap, Method};

/// Picks the best-matching enabled route within `rule` for a request.
///
/// Filtering order: enabled, host match, method set (empty set matches
/// any method), required headers (case-insensitive name, `*` wildcard
/// value). Among the routes that pass every filter, the one with the
/// longest `path_prefix` wins; ties break in declaration order (first
/// listed wins), matching the teacher's `Vec::iter().find()` stability.
pub fn pick_route<'a>(
    rule: &'a HttpRule,
    host: &str,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
) -> Option<&'a HttpRoute> {
    rule.routes
        .iter()
        .filter(|r| r.enabled)
        .filter(|r| r.host.matches(host))
        .filter(|r| path.starts_with(r.path_prefix.as_str()))
        .filter(|r| r.methods.is_empty() || r.methods.contains(method))
        .filter(|r| required_headers_match(r, headers))
        .max_by_key(|r| r.path_prefix.len())
}

fn required_headers_match(route: &HttpRoute, headers: &HeaderMap) -> bool {
    route.required_headers.iter().all(|(name, expected)| {
        headers.get(name.as_str()).and_then(|v| v.to_str().ok()).is_some_and(|actual| {
            expected == "*" || actual.eq_ignore_ascii_case(expected)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostMatch, WeightedUpstream};
    use std::collections::{BTreeMap, BTreeSet};

    fn route(id: &str, prefix: &str) -> HttpRoute {
        HttpRoute {
            id: id.to_string(),
            enabled: true,
            host: HostMatch::Any,
            path_prefix: prefix.to_string(),
            methods: BTreeSet::new(),
            required_headers: BTreeMap::new(),
            exclude_basic_auth: false,
            follow_redirects: false,
            proxy_pass_path: None,
            static_dir: None,
            set_headers: vec![],
            remove_headers: vec![],
            url_rewrites: vec![],
            request_body_replace: None,
            response_body_replace: None,
            upstreams: vec![WeightedUpstream { url: "http://127.0.0.1:9000".parse().unwrap(), weight: 1 }],
        }
    }

    fn rule(routes: Vec<HttpRoute>) -> HttpRule {
        HttpRule {
            id: "r".to_string(),
            enabled: true,
            listen_addrs: BTreeSet::new(),
            tls: None,
            basic_auth: None,
            rate_limit: None,
            routes,
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let r = rule(vec![route("a", "/api"), route("b", "/api/v2")]);
        let picked =
            pick_route(&r, "example.com", "/api/v2/users", &Method::GET, &HeaderMap::new()).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn disabled_route_never_matches() {
        let mut disabled = route("x", "/");
        disabled.enabled = false;
        let r = rule(vec![disabled]);
        assert!(pick_route(&r, "h", "/anything", &Method::GET, &HeaderMap::new()).is_none());
    }

    #[test]
    fn host_mismatch_excludes_route() {
        let mut host_route = route("h", "/");
        host_route.host = HostMatch::Exact("only.example.com".to_string());
        let r = rule(vec![host_route]);
        assert!(pick_route(&r, "other.example.com", "/", &Method::GET, &HeaderMap::new()).is_none());
    }

    #[test]
    fn required_header_wildcard_matches_any_value() {
        let mut route_hdr = route("h", "/");
        route_hdr.required_headers.insert("x-api-key".to_string(), "*".to_string());
        let r = rule(vec![route_hdr]);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "anything".parse().unwrap());
        assert!(pick_route(&r, "h", "/", &Method::GET, &headers).is_some());
    }

    #[test]
    fn missing_required_header_excludes_route() {
        let mut route_hdr = route("h", "/");
        route_hdr.required_headers.insert("x-api-key".to_string(), "secret".to_string());
        let r = rule(vec![route_hdr]);
        assert!(pick_route(&r, "h", "/", &Method::GET, &HeaderMap::new()).is_none());
    }
}
