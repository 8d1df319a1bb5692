//! Header mutations, generalizing the teacher's
//! `proxy/handler/header_manipulation.rs` (global + per-route add/remove
//! groups) to the flat `set_headers`/`remove_headers` lists on
//! [`crate::config::HttpRoute`], plus `$remote_addr`/`$scheme`/`$host`
//! variable expansion for `set_headers` values (spec §4.G).

use http::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

pub struct HeaderContext<'a> {
    pub remote_addr: IpAddr,
    pub host: &'a str,
    pub scheme: &'a str,
}

/// Removes `remove_headers` then applies `set_headers` (insert/overwrite),
/// expanding `$remote_addr`, `$scheme`, and `$host` in values. Unparseable
/// names or values are skipped with a warning, matching the teacher's
/// fail-open-per-header behavior rather than aborting the whole request.
pub fn apply_header_mutations(
    headers: &mut HeaderMap,
    set_headers: &[(String, String)],
    remove_headers: &[String],
    ctx: &HeaderContext,
) {
    for name in remove_headers {
        if let Ok(name) = HeaderName::from_bytes(name.to_lowercase().as_bytes()) {
            headers.remove(&name);
        } else {
            tracing::warn!(header = %name, "failed to parse header name for removal");
        }
    }

    for (name, value) in set_headers {
        let expanded = expand_vars(value, ctx);
        match (HeaderName::from_bytes(name.to_lowercase().as_bytes()), HeaderValue::from_str(&expanded)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            (Err(e), _) => tracing::warn!(header = %name, error = %e, "invalid header name"),
            (_, Err(e)) => tracing::warn!(header = %name, error = %e, "invalid header value"),
        }
    }
}

fn expand_vars(value: &str, ctx: &HeaderContext) -> String {
    value
        .replace("$remote_addr", &ctx.remote_addr.to_string())
        .replace("$scheme", ctx.scheme)
        .replace("$host", ctx.host)
}

/// Appends `remote_addr` to any existing `X-Forwarded-For` value (comma
/// separated, per spec §9's chosen canonical form), or sets it if absent.
pub fn append_x_forwarded_for(headers: &mut HeaderMap, remote_addr: IpAddr) {
    let next = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {remote_addr}"),
        _ => remote_addr.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&next) {
        headers.insert("x-forwarded-for", value);
    }
}

pub fn set_forwarding_headers(headers: &mut HeaderMap, remote_addr: IpAddr, proto: &str) {
    append_x_forwarded_for(headers, remote_addr);
    if let Ok(value) = HeaderValue::from_str(&remote_addr.to_string()) {
        headers.insert("x-real-ip", value);
    }
    if let Ok(value) = HeaderValue::from_str(proto) {
        headers.insert("x-forwarded-proto", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_headers_expands_remote_addr() {
        let mut headers = HeaderMap::new();
        let ctx = HeaderContext { remote_addr: "1.2.3.4".parse().unwrap(), host: "example.com", scheme: "http" };
        apply_header_mutations(
            &mut headers,
            &[("x-client-ip".to_string(), "$remote_addr".to_string())],
            &[],
            &ctx,
        );
        assert_eq!(headers.get("x-client-ip").unwrap(), "1.2.3.4");
    }

    #[test]
    fn set_headers_expands_scheme() {
        let mut headers = HeaderMap::new();
        let ctx = HeaderContext { remote_addr: "1.2.3.4".parse().unwrap(), host: "example.com", scheme: "https" };
        apply_header_mutations(
            &mut headers,
            &[("x-forwarded-scheme".to_string(), "$scheme".to_string())],
            &[],
            &ctx,
        );
        assert_eq!(headers.get("x-forwarded-scheme").unwrap(), "https");
    }

    #[test]
    fn remove_then_set_order() {
        let mut headers = HeaderMap::new();
        headers.insert("server", "nginx".parse().unwrap());
        let ctx = HeaderContext { remote_addr: "1.2.3.4".parse().unwrap(), host: "h", scheme: "http" };
        apply_header_mutations(
            &mut headers,
            &[("server".to_string(), "vantage".to_string())],
            &["server".to_string()],
            &ctx,
        );
        assert_eq!(headers.get("server").unwrap(), "vantage");
    }

    #[test]
    fn xff_appends_comma_separated() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
        append_x_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn xff_sets_when_absent() {
        let mut headers = HeaderMap::new();
        append_x_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.2");
    }
}
