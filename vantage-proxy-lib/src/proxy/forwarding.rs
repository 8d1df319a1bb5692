//! Forwards a request to a chosen upstream and relays its response,
//! generalizing the teacher's `proxy/forwarding.rs::forward` (a single
//! hardcoded backend string) to arbitrary upstream URIs drawn from a
//! [`crate::selector`] pick, with bounded buffering in front of body
//! transformation and optional redirect following.

use super::http_result::HttpError;
use super::synthetic_response::{bytes_body, RespBody};
use crate::config::{BodyReplace, HttpRoute, Limits};
use crate::pool::UpstreamPool;
use crate::transform::{body as body_transform, url_rewrite};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Limited, LengthLimitError};
use hyper::body::Incoming;
use std::time::Duration;

const MAX_REDIRECTS: u8 = 5;

/// Builds the outbound request URI: upstream origin + (rewritten) path and
/// query from the inbound request.
pub fn build_upstream_uri(upstream: &Uri, route: &HttpRoute, inbound_path_and_query: &str) -> Result<Uri, HttpError> {
    let path = inbound_path_and_query.split('?').next().unwrap_or("");
    let query = inbound_path_and_query.splitn(2, '?').nth(1);

    let rewritten = url_rewrite::rewrite_path(path, &route.url_rewrites);
    let stripped = match &route.proxy_pass_path {
        Some(prefix) => format!("{prefix}{}", rewritten.strip_prefix(&route.path_prefix).unwrap_or(&rewritten)),
        None => rewritten,
    };

    let path_and_query = match query {
        Some(q) => format!("{stripped}?{q}"),
        None => stripped,
    };

    let authority = upstream.authority().ok_or(HttpError::InvalidUri("upstream missing authority".into()))?;
    let scheme = upstream.scheme_str().unwrap_or("http");

    format!("{scheme}://{authority}{path_and_query}")
        .parse::<Uri>()
        .map_err(|e| HttpError::InvalidUri(e.to_string()))
}

/// Buffers the inbound request body up to `max_request_body`, returning
/// the parts and bytes so a caller (e.g. the failover loop in
/// `proxy::mod`) can retarget the same buffered request at several
/// upstream candidates without re-reading the client socket.
pub async fn buffer_request(
    req: Request<Incoming>,
    limits: &Limits,
) -> Result<(http::request::Parts, Bytes), HttpError> {
    let (parts, body) = req.into_parts();
    let limited_body = Limited::new(body, limits.max_request_body as usize);
    let collected = limited_body.collect().await.map_err(|e| too_large_or(e, limits.max_request_body))?.to_bytes();
    Ok((parts, collected))
}

/// `Limited::collect` reports both genuine I/O failures and the
/// over-the-limit case through the same boxed error type; this
/// distinguishes them so oversized payloads surface as 413 rather than a
/// generic upstream-generation failure.
fn too_large_or(err: Box<dyn std::error::Error + Send + Sync>, limit: u64) -> HttpError {
    if err.downcast_ref::<LengthLimitError>().is_some() {
        HttpError::PayloadTooLarge(body_transform::PayloadTooLarge { size: limit + 1, limit })
    } else {
        HttpError::FailedToGenerateUpstreamRequest(err.to_string())
    }
}

/// Forwards `req` to `uri` via the pool's client for that origin, then
/// optionally follows 307/308 redirects (preserving the body only for
/// idempotent methods, per the chosen interpretation of spec §9's Open
/// Question) up to [`MAX_REDIRECTS`] hops.
pub async fn forward(
    req: Request<Incoming>,
    uri: Uri,
    pool: &UpstreamPool,
    limits: &Limits,
    follow_redirects: bool,
) -> Result<Response<RespBody>, HttpError> {
    let http2 = req.version() == http::Version::HTTP_2;
    let (mut parts, body) = buffer_request(req, limits).await?;
    parts.uri = uri;
    forward_buffered(parts, body, pool, limits, follow_redirects, http2).await
}

/// Core send-and-follow-redirects loop, operating on an already-buffered
/// request body. `parts.uri` must already be the target upstream URI.
/// Used both by [`forward`] (single-shot) and by the HTTP engine's
/// failover loop, which calls this once per upstream candidate with the
/// same buffered `body`.
pub async fn forward_buffered(
    mut parts: http::request::Parts,
    body: Bytes,
    pool: &UpstreamPool,
    limits: &Limits,
    follow_redirects: bool,
    http2: bool,
) -> Result<Response<RespBody>, HttpError> {
    let method = parts.method.clone();
    let key = crate::pool::OriginKey::from_uri(&parts.uri, http2)
        .ok_or_else(|| HttpError::InvalidUri("upstream missing scheme/authority".into()))?;
    let client = pool.client_for(key);

    let mut current_body = body;
    let mut hops = 0u8;

    loop {
        // `http::request::Parts` holds an `Extensions` bag that isn't
        // `Clone`, so each attempt is rebuilt from its cloneable fields
        // rather than cloning `parts` wholesale; outbound requests never
        // need the inbound extensions anyway.
        let mut out_req = Request::new(bytes_to_incoming_body(current_body.clone()));
        *out_req.method_mut() = parts.method.clone();
        *out_req.uri_mut() = parts.uri.clone();
        *out_req.version_mut() = parts.version;
        *out_req.headers_mut() = parts.headers.clone();

        let resp = client
            .request(out_req)
            .await
            .map_err(|e| HttpError::FailedToGetResponseFromBackend(e.to_string()))?;

        if !follow_redirects || !matches!(resp.status(), StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT) {
            return buffer_response(resp, limits).await;
        }
        if hops >= MAX_REDIRECTS {
            return Err(HttpError::TooManyRedirects);
        }

        let Some(location) = resp.headers().get(http::header::LOCATION).and_then(|v| v.to_str().ok()) else {
            return buffer_response(resp, limits).await;
        };
        let Ok(next_uri) = location.parse::<Uri>() else {
            return buffer_response(resp, limits).await;
        };

        if !is_idempotent(&method) {
            current_body = Bytes::new();
        }
        parts.uri = next_uri;
        hops += 1;
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

async fn buffer_response(
    resp: Response<Incoming>,
    limits: &Limits,
) -> Result<Response<RespBody>, HttpError> {
    let (parts, body) = resp.into_parts();
    let limited = Limited::new(body, limits.max_response_body as usize);
    let bytes = limited
        .collect()
        .await
        .map_err(|e| match e.downcast_ref::<LengthLimitError>() {
            Some(_) => HttpError::PayloadTooLarge(body_transform::PayloadTooLarge {
                size: limits.max_response_body + 1,
                limit: limits.max_response_body,
            }),
            None => HttpError::FailedToGenerateDownstreamResponse(e.to_string()),
        })?
        .to_bytes();
    Ok(Response::from_parts(parts, bytes_body(bytes)))
}

fn bytes_to_incoming_body(bytes: Bytes) -> http_body_util::Full<Bytes> {
    http_body_util::Full::new(bytes)
}

pub fn apply_body_replace(bytes: Bytes, rule: Option<&BodyReplace>, content_type: Option<&str>) -> Bytes {
    match rule {
        Some(rule) => body_transform::replace_body(bytes, rule, content_type),
        None => bytes,
    }
}

pub fn connect_timeout(limits: &Limits) -> Duration {
    Duration::from_millis(limits.connect_timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostMatch;
    use std::collections::{BTreeMap, BTreeSet};

    fn route() -> HttpRoute {
        HttpRoute {
            id: "r".into(),
            enabled: true,
            host: HostMatch::Any,
            path_prefix: "/api".into(),
            methods: BTreeSet::new(),
            required_headers: BTreeMap::new(),
            exclude_basic_auth: false,
            follow_redirects: false,
            proxy_pass_path: Some("".to_string()),
            static_dir: None,
            set_headers: vec![],
            remove_headers: vec![],
            url_rewrites: vec![],
            request_body_replace: None,
            response_body_replace: None,
            upstreams: vec![],
        }
    }

    #[test]
    fn strips_route_prefix_when_proxy_pass_path_set() {
        let upstream: Uri = "http://backend:9000".parse().unwrap();
        let uri = build_upstream_uri(&upstream, &route(), "/api/users?x=1").unwrap();
        assert_eq!(uri.path(), "/users");
        assert_eq!(uri.query(), Some("x=1"));
    }

    #[test]
    fn preserves_full_path_without_proxy_pass_path() {
        let mut r = route();
        r.proxy_pass_path = None;
        let upstream: Uri = "http://backend:9000".parse().unwrap();
        let uri = build_upstream_uri(&upstream, &r, "/api/users").unwrap();
        assert_eq!(uri.path(), "/api/users");
    }

    #[test]
    fn idempotent_methods_classified_correctly() {
        assert!(is_idempotent(&Method::GET));
        assert!(!is_idempotent(&Method::POST));
    }
}
