//! Turns a [`RawConfig`] into a validated, statically-typed [`Config`].
//!
//! This is the sole place where defaulting, id generation and cross-field
//! checks happen (spec §4.A). Every failure is reported as a
//! [`ValidationError`] carrying a dotted path so the caller can point a
//! management UI straight at the offending field, instead of panicking or
//! silently coercing bad input the way a dynamically-typed config loader
//! would.

use super::model::*;
use super::raw::*;
use crate::error::ValidationError;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub fn validate(raw: RawConfig) -> Result<Config, ValidationError> {
    let mut seen_http_ids = BTreeSet::new();
    let http_rules = raw
        .http_rules
        .into_iter()
        .enumerate()
        .map(|(i, r)| validate_http_rule(&format!("http_rules[{i}]"), r, &mut seen_http_ids))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen_ws_ids = BTreeSet::new();
    let ws_rules = raw
        .ws_rules
        .into_iter()
        .enumerate()
        .map(|(i, r)| validate_ws_rule(&format!("ws_rules[{i}]"), r, &mut seen_ws_ids))
        .collect::<Result<Vec<_>, _>>()?;

    let stream = validate_stream(&raw.stream)?;
    let access = validate_access(&raw.access)?;
    let limits = validate_limits(&raw.limits)?;
    let compression = validate_compression(&raw.compression)?;

    if http_rules.is_empty() && !ws_rules.is_empty() {
        // WS rules piggyback on an HTTP listener upgrade in this design;
        // nothing to validate further here, listener wiring is the
        // supervisor's job (component K binds by (addr, protocol)).
    }

    Ok(Config { http_rules, ws_enabled: raw.ws_enabled, ws_rules, stream, access, limits, compression })
}

fn gen_id(prefix: &str, seen: &mut BTreeSet<String>) -> String {
    let mut n = seen.len();
    loop {
        let candidate = format!("{prefix}-{n}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn validate_http_rule(
    path: &str,
    raw: RawHttpRule,
    seen_ids: &mut BTreeSet<String>,
) -> Result<HttpRule, ValidationError> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => {
            if !seen_ids.insert(id.clone()) {
                return Err(ValidationError::new(format!("{path}.id"), format!("duplicate rule id `{id}`")));
            }
            id
        }
        _ => gen_id("rule", seen_ids),
    };

    // Invariant: a rule contributes listen_addr (singleton) and/or
    // listen_addrs (list); the union must be non-empty.
    let mut addrs = BTreeSet::new();
    if let Some(single) = raw.listen_addr {
        addrs.insert(parse_addr(&format!("{path}.listen_addr"), &single)?);
    }
    for (i, a) in raw.listen_addrs.iter().enumerate() {
        addrs.insert(parse_addr(&format!("{path}.listen_addrs[{i}]"), a)?);
    }
    if addrs.is_empty() {
        return Err(ValidationError::new(
            format!("{path}.listen_addrs"),
            "a rule needs at least one listen address".into(),
        ));
    }

    let tls = raw
        .tls
        .map(|t| validate_tls(&format!("{path}.tls"), t))
        .transpose()?;

    let basic_auth = raw.basic_auth.map(|b| BasicAuth { user: b.user, pass: b.pass, forward: b.forward });

    let rate_limit = raw
        .rate_limit
        .map(|r| validate_rate_limit(&format!("{path}.rate_limit"), r))
        .transpose()?;

    let mut seen_route_ids = BTreeSet::new();
    let routes = raw
        .routes
        .into_iter()
        .enumerate()
        .map(|(i, r)| validate_http_route(&format!("{path}.routes[{i}]"), r, &mut seen_route_ids))
        .collect::<Result<Vec<_>, _>>()?;

    if raw.enabled && routes.iter().filter(|r| r.enabled).count() == 0 {
        return Err(ValidationError::new(
            format!("{path}.routes"),
            "an enabled rule needs at least one enabled route".into(),
        ));
    }

    Ok(HttpRule { id, enabled: raw.enabled, listen_addrs: addrs, tls, basic_auth, rate_limit, routes })
}

fn validate_tls(path: &str, raw: RawTlsMaterial) -> Result<TlsMaterial, ValidationError> {
    if !PathBuf::from(&raw.cert).exists() {
        return Err(ValidationError::new(format!("{path}.cert"), format!("cert file not found: {}", raw.cert)));
    }
    if !PathBuf::from(&raw.key).exists() {
        return Err(ValidationError::new(format!("{path}.key"), format!("key file not found: {}", raw.key)));
    }
    Ok(TlsMaterial { cert: raw.cert, key: raw.key })
}

fn validate_rate_limit(path: &str, raw: RawRateLimitRule) -> Result<RateLimitRule, ValidationError> {
    if raw.rps < 1 {
        return Err(ValidationError::new(format!("{path}.rps"), "rps must be >= 1".into()));
    }
    if raw.burst < 1 {
        return Err(ValidationError::new(format!("{path}.burst"), "burst must be >= 1".into()));
    }
    Ok(RateLimitRule { rps: raw.rps, burst: raw.burst, ban_seconds: raw.ban_seconds })
}

fn validate_http_route(
    path: &str,
    raw: RawHttpRoute,
    seen_ids: &mut BTreeSet<String>,
) -> Result<HttpRoute, ValidationError> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => {
            if !seen_ids.insert(id.clone()) {
                return Err(ValidationError::new(format!("{path}.id"), format!("duplicate route id `{id}`")));
            }
            id
        }
        _ => gen_id("route", seen_ids),
    };

    let host = match raw.host.as_deref() {
        None | Some("") | Some("*") => HostMatch::Any,
        Some(h) if h.starts_with("*.") => HostMatch::WildcardSuffix(h[1..].to_string()),
        Some(h) => HostMatch::Exact(h.to_string()),
    };

    // Normalize to start with '/' per invariant 5.
    let mut path_prefix = raw.path.unwrap_or_else(|| "/".to_string());
    if !path_prefix.starts_with('/') {
        path_prefix = format!("/{path_prefix}");
    }

    let methods = raw
        .methods
        .iter()
        .map(|m| {
            http::Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| ValidationError::new(format!("{path}.methods"), format!("invalid method `{m}`")))
        })
        .collect::<Result<BTreeSet<_>, _>>()?;

    let static_dir = raw.static_dir.map(PathBuf::from);

    if raw.enabled && raw.upstreams.is_empty() && static_dir.is_none() {
        return Err(ValidationError::new(
            format!("{path}.upstreams"),
            "an enabled route needs at least one upstream or a static_dir".into(),
        ));
    }

    let upstreams = raw
        .upstreams
        .into_iter()
        .enumerate()
        .map(|(i, u)| validate_weighted_upstream(&format!("{path}.upstreams[{i}]"), u))
        .collect::<Result<Vec<_>, _>>()?;

    let url_rewrites = raw
        .url_rewrites
        .into_iter()
        .enumerate()
        .map(|(i, r)| validate_url_rewrite(&format!("{path}.url_rewrites[{i}]"), r))
        .collect::<Result<Vec<_>, _>>()?;

    let request_body_replace = raw
        .request_body_replace
        .map(|b| validate_body_replace(&format!("{path}.request_body_replace"), b))
        .transpose()?;
    let response_body_replace = raw
        .response_body_replace
        .map(|b| validate_body_replace(&format!("{path}.response_body_replace"), b))
        .transpose()?;

    let set_headers = raw.set_headers.into_iter().collect::<Vec<_>>();

    Ok(HttpRoute {
        id,
        enabled: raw.enabled,
        host,
        path_prefix,
        methods,
        required_headers: raw.required_headers,
        exclude_basic_auth: raw.exclude_basic_auth,
        follow_redirects: raw.follow_redirects,
        proxy_pass_path: raw.proxy_pass_path,
        static_dir,
        set_headers,
        remove_headers: raw.remove_headers,
        url_rewrites,
        request_body_replace,
        response_body_replace,
        upstreams,
    })
}

fn validate_weighted_upstream(path: &str, raw: RawWeightedUpstream) -> Result<WeightedUpstream, ValidationError> {
    if raw.weight == 0 {
        return Err(ValidationError::new(format!("{path}.weight"), "weight must be >= 1".into()));
    }
    let url = raw
        .url
        .parse::<http::Uri>()
        .map_err(|e| ValidationError::new(format!("{path}.url"), format!("invalid upstream url: {e}")))?;
    Ok(WeightedUpstream { url, weight: raw.weight })
}

fn validate_url_rewrite(path: &str, raw: RawUrlRewrite) -> Result<UrlRewrite, ValidationError> {
    let regex = Regex::new(&raw.regex)
        .map_err(|e| ValidationError::new(format!("{path}.regex"), format!("invalid regex: {e}")))?;
    Ok(UrlRewrite { regex, replacement: raw.replacement, enabled: raw.enabled })
}

fn validate_body_replace(path: &str, raw: RawBodyReplace) -> Result<BodyReplace, ValidationError> {
    let regex = if raw.use_regex {
        Some(
            Regex::new(&raw.find)
                .map_err(|e| ValidationError::new(format!("{path}.find"), format!("invalid regex: {e}")))?,
        )
    } else {
        None
    };
    Ok(BodyReplace {
        find: raw.find,
        replace: raw.replace,
        use_regex: raw.use_regex,
        regex,
        enabled: raw.enabled,
        content_types: raw.content_types,
    })
}

fn validate_ws_rule(
    path: &str,
    raw: RawWsRule,
    seen_ids: &mut BTreeSet<String>,
) -> Result<WsRule, ValidationError> {
    let id = match raw.id {
        Some(id) if !id.is_empty() => {
            if !seen_ids.insert(id.clone()) {
                return Err(ValidationError::new(format!("{path}.id"), format!("duplicate rule id `{id}`")));
            }
            id
        }
        _ => gen_id("ws-rule", seen_ids),
    };

    let mut addrs = BTreeSet::new();
    if let Some(single) = raw.listen_addr {
        addrs.insert(parse_addr(&format!("{path}.listen_addr"), &single)?);
    }
    for (i, a) in raw.listen_addrs.iter().enumerate() {
        addrs.insert(parse_addr(&format!("{path}.listen_addrs[{i}]"), a)?);
    }
    if addrs.is_empty() {
        return Err(ValidationError::new(
            format!("{path}.listen_addrs"),
            "a rule needs at least one listen address".into(),
        ));
    }

    let tls = raw.tls.map(|t| validate_tls(&format!("{path}.tls"), t)).transpose()?;
    let rate_limit = raw
        .rate_limit
        .map(|r| validate_rate_limit(&format!("{path}.rate_limit"), r))
        .transpose()?;

    let mut seen_route_ids = BTreeSet::new();
    let routes = raw
        .routes
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let rpath = format!("{path}.routes[{i}]");
            let id = match r.id {
                Some(id) if !id.is_empty() => {
                    if !seen_route_ids.insert(id.clone()) {
                        return Err(ValidationError::new(
                            format!("{rpath}.id"),
                            format!("duplicate route id `{id}`"),
                        ));
                    }
                    id
                }
                _ => gen_id("ws-route", &mut seen_route_ids),
            };
            let upstream_url = r
                .upstream_url
                .parse::<http::Uri>()
                .map_err(|e| ValidationError::new(format!("{rpath}.upstream_url"), format!("invalid url: {e}")))?;
            let mut prefix = r.path;
            if !prefix.starts_with('/') {
                prefix = format!("/{prefix}");
            }
            Ok(WsRoute { id, path_prefix: prefix, upstream_url })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WsRule { id, enabled: raw.enabled, listen_addrs: addrs, tls, rate_limit, routes })
}

fn validate_stream(raw: &RawStreamConfig) -> Result<StreamConfig, ValidationError> {
    let mut upstreams = BTreeMap::new();
    for (name, u) in &raw.upstreams {
        if u.members.is_empty() {
            return Err(ValidationError::new(
                format!("stream.upstreams.{name}.members"),
                "an upstream needs at least one member".into(),
            ));
        }
        let members = u
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if m.weight == 0 {
                    return Err(ValidationError::new(
                        format!("stream.upstreams.{name}.members[{i}].weight"),
                        "weight must be >= 1".into(),
                    ));
                }
                Ok(WeightedMember { host: m.host.clone(), port: m.port, weight: m.weight })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // Per spec §9 Open Question: consistent hashing is the sole stream
        // selection mode, so `hash_key` only ever resolves to ClientAddress
        // today; the field is retained for forward compatibility.
        let _ = &u.hash_key;
        upstreams.insert(name.clone(), StreamUpstream { hash_key: HashKey::ClientAddress, members });
    }

    let servers = raw
        .servers
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let path = format!("stream.servers[{i}]");
            if s.enabled && !upstreams.contains_key(&s.proxy_pass) {
                return Err(ValidationError::new(
                    format!("{path}.proxy_pass"),
                    format!("no such stream upstream `{}`", s.proxy_pass),
                ));
            }
            let protocol = match s.protocol.to_ascii_lowercase().as_str() {
                "tcp" => TcpOrUdp::Tcp,
                "udp" => TcpOrUdp::Udp,
                other => {
                    return Err(ValidationError::new(
                        format!("{path}.protocol"),
                        format!("unknown protocol `{other}`, expected tcp or udp"),
                    ))
                }
            };
            Ok(StreamServer {
                enabled: s.enabled,
                listen_port: s.listen_port,
                protocol,
                proxy_pass: s.proxy_pass.clone(),
                connect_timeout: Duration::from_millis(s.connect_timeout_ms),
                idle_timeout: Duration::from_secs(s.idle_timeout_secs),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StreamConfig { enabled: raw.enabled, upstreams, servers })
}

fn validate_access(raw: &RawAccessConfig) -> Result<AccessConfig, ValidationError> {
    let whitelist = raw
        .whitelist
        .iter()
        .enumerate()
        .map(|(i, w)| {
            ipnet::IpNet::from_str(w)
                .map_err(|e| ValidationError::new(format!("access.whitelist[{i}]"), format!("invalid CIDR: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let blacklist = raw
        .blacklist
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let ip = b.ip.parse().map_err(|e| {
                ValidationError::new(format!("access.blacklist[{i}].ip"), format!("invalid IP: {e}"))
            })?;
            Ok(BlacklistEntry { ip, reason: b.reason.clone(), expires_at: b.expires_at, created_at: b.created_at })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AccessConfig {
        http_enabled: raw.http_enabled,
        ws_enabled: raw.ws_enabled,
        stream_enabled: raw.stream_enabled,
        allow_all_lan: raw.allow_all_lan,
        allow_all_public: raw.allow_all_public,
        whitelist,
        blacklist,
    })
}

fn validate_limits(raw: &RawLimits) -> Result<Limits, ValidationError> {
    Ok(Limits {
        max_request_body: raw.max_request_body,
        max_response_body: raw.max_response_body,
        connect_timeout_ms: raw.connect_timeout_ms,
        read_timeout_ms: raw.read_timeout_ms,
        pool_max_idle: raw.pool_max_idle,
        pool_idle_timeout_sec: raw.pool_idle_timeout_sec,
        enable_http2: raw.enable_http2,
    })
}

fn validate_compression(raw: &RawCompressionConfig) -> Result<CompressionConfig, ValidationError> {
    if raw.gzip.level > 9 {
        return Err(ValidationError::new("compression.gzip.level", "gzip level must be 0-9".into()));
    }
    if raw.brotli.level > 11 {
        return Err(ValidationError::new("compression.brotli.level", "brotli level must be 0-11".into()));
    }
    Ok(CompressionConfig {
        enabled: raw.enabled,
        gzip: GzipConfig { on: raw.gzip.on, level: raw.gzip.level },
        brotli: BrotliConfig { on: raw.brotli.on, level: raw.brotli.level },
        min_length: raw.min_length,
    })
}

fn parse_addr(path: &str, s: &str) -> Result<SocketAddr, ValidationError> {
    s.parse::<SocketAddr>()
        .map_err(|e| ValidationError::new(path, format!("invalid listen address `{s}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw() -> RawConfig {
        let mut rule = RawHttpRule { enabled: true, ..Default::default() };
        rule.listen_addr = Some("127.0.0.1:8080".to_string());
        rule.routes.push(RawHttpRoute {
            enabled: true,
            upstreams: vec![RawWeightedUpstream { url: "http://127.0.0.1:9000".to_string(), weight: 1 }],
            ..Default::default()
        });
        RawConfig { http_rules: vec![rule], ..Default::default() }
    }

    #[test]
    fn validates_minimal_config() {
        let cfg = validate(minimal_raw()).expect("should validate");
        assert_eq!(cfg.http_rules.len(), 1);
        assert_eq!(cfg.http_rules[0].routes.len(), 1);
        assert!(cfg.http_rules[0].listen_addrs.contains(&"127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn rejects_rule_without_listen_addr() {
        let mut raw = minimal_raw();
        raw.http_rules[0].listen_addr = None;
        let err = validate(raw).unwrap_err();
        assert!(err.path.ends_with("listen_addrs"));
    }

    #[test]
    fn rejects_enabled_route_without_upstream_or_static_dir() {
        let mut raw = minimal_raw();
        raw.http_rules[0].routes[0].upstreams.clear();
        let err = validate(raw).unwrap_err();
        assert!(err.path.ends_with("upstreams"));
    }

    #[test]
    fn rejects_duplicate_rule_ids() {
        let mut raw = minimal_raw();
        let mut second = raw.http_rules[0].clone();
        second.id = raw.http_rules[0].id.clone().or(Some("dup".to_string()));
        raw.http_rules[0].id = Some("dup".to_string());
        second.id = Some("dup".to_string());
        raw.http_rules.push(second);
        let err = validate(raw).unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn normalizes_path_prefix_to_start_with_slash() {
        let mut raw = minimal_raw();
        raw.http_rules[0].routes[0].path = Some("api".to_string());
        let cfg = validate(raw).unwrap();
        assert_eq!(cfg.http_rules[0].routes[0].path_prefix, "/api");
    }

    #[test]
    fn rejects_zero_rps_rate_limit() {
        let mut raw = minimal_raw();
        raw.http_rules[0].rate_limit = Some(RawRateLimitRule { rps: 0, burst: 10, ban_seconds: 60 });
        let err = validate(raw).unwrap_err();
        assert!(err.path.ends_with("rps"));
    }

    #[test]
    fn blacklist_entry_active_semantics() {
        let permanent = BlacklistEntry { ip: "1.2.3.4".parse().unwrap(), reason: String::new(), expires_at: 0, created_at: 0 };
        assert!(permanent.is_active(1_000_000));

        let expired = BlacklistEntry { ip: "1.2.3.4".parse().unwrap(), reason: String::new(), expires_at: 100, created_at: 0 };
        assert!(!expired.is_active(200));
        assert!(expired.is_active(50));
    }

    #[test]
    fn rejects_stream_server_pointing_at_unknown_upstream() {
        let mut raw = RawConfig::default();
        raw.stream.enabled = true;
        raw.stream.servers.push(RawStreamServer {
            enabled: true,
            listen_port: 5000,
            protocol: "tcp".to_string(),
            proxy_pass: "missing".to_string(),
            connect_timeout_ms: 5000,
            idle_timeout_secs: 300,
        });
        let err = validate(raw).unwrap_err();
        assert!(err.path.ends_with("proxy_pass"));
    }
}
