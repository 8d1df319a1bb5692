//! The HTTP Proxy Engine (spec §4.H): per-listener accept loop plus the
//! full per-request state machine (`Accepted → Authorized → Matched →
//! Transformed → UpstreamAcquired → Forwarding → Responding → Completed |
//! Failed{stage, reason}`).
//!
//! Grounded on the teacher's `proxy/server.rs` (hyper auto-builder +
//! per-connection spawn + TLS acceptor wrap) and `proxy/forwarding.rs`
//! (buffer → send → buffer-response), generalized from one hardcoded
//! backend to the multi-rule/multi-route config model, with access
//! control, rate limiting, basic auth, transform, static files, and
//! observation added around it.

pub mod basic_auth;
pub mod forwarding;
pub mod http_result;
pub mod route_state;
pub mod static_files;
pub mod synthetic_response;

use self::route_state::RouteSelector;
use self::synthetic_response::{bytes_body, synthetic_error_response, RespBody};
use crate::config::{CompressionConfig, HttpRoute, HttpRule, Limits};
use crate::observer::{ObservedRecord, Observer};
use crate::pool::UpstreamPool;
use crate::security::rate_limit::RateLimitManager;
use crate::security::{AccessControl, Protocol};
use crate::tls::ReloadingAcceptor;
use crate::transform::compression::{self, Encoding};
use crate::transform::headers::{apply_header_mutations, set_forwarding_headers, HeaderContext};

use arc_swap::ArcSwap;
use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::Body as _;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Headers that are meaningful only for a single transport hop and must
/// never be relayed (spec §4.H, RFC 7230 §6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

const COMPRESSIBLE_PREFIXES: &[&str] =
    &["text/", "application/json", "application/javascript", "application/xml", "image/svg+xml"];

fn is_compressible(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| COMPRESSIBLE_PREFIXES.iter().any(|p| ct.starts_with(p)))
}

/// Everything a single HTTP listener (one `HttpRule`) needs across its
/// lifetime, including through hot reconfiguration. Route/auth/transform
/// fields are behind [`ArcSwap`] so the supervisor (component K) can swap
/// them atomically; a request captures one consistent view at the top of
/// [`handle_request`] and never re-reads it mid-flight (spec invariant:
/// "a published new snapshot never causes in-flight requests... to
/// change... mid-flight").
pub struct HttpListenerState {
    pub listener_id: String,
    pub rule: ArcSwap<HttpRule>,
    pub limits: ArcSwap<Limits>,
    pub compression: ArcSwap<CompressionConfig>,
    pub pool: Arc<UpstreamPool>,
    pub access: Arc<AccessControl>,
    pub rate_limit: ArcSwap<RateLimitManager>,
    pub observer: Arc<Observer>,
    pub is_https: bool,
    selectors: DashMap<String, RouteSelector>,
    active_connections: AtomicUsize,
}

impl HttpListenerState {
    pub fn new(
        listener_id: String,
        rule: Arc<HttpRule>,
        limits: Limits,
        compression: CompressionConfig,
        pool: Arc<UpstreamPool>,
        access: Arc<AccessControl>,
        rate_limit: Arc<RateLimitManager>,
        observer: Arc<Observer>,
        is_https: bool,
    ) -> Self {
        let selectors = DashMap::new();
        for route in &rule.routes {
            selectors.insert(route.id.clone(), RouteSelector::new(route.upstreams.clone()));
        }
        Self {
            listener_id,
            rule: ArcSwap::from(rule),
            limits: ArcSwap::from_pointee(limits),
            compression: ArcSwap::from_pointee(compression),
            pool,
            access,
            rate_limit: ArcSwap::from(rate_limit),
            observer,
            is_https,
            selectors,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Swaps in a freshly-validated rule (component K's in-place update
    /// path for an unchanged listener identity). Route selectors are kept
    /// for route ids that still exist with the same upstream count;
    /// anything else is rebuilt, losing its round-robin cursor and
    /// failure history, which is acceptable since the set of upstreams
    /// changed anyway.
    pub fn update(&self, rule: Arc<HttpRule>, limits: Limits, compression: CompressionConfig) {
        for route in &rule.routes {
            let needs_rebuild = self
                .selectors
                .get(&route.id)
                .map(|s| s.len() != route.upstreams.len())
                .unwrap_or(true);
            if needs_rebuild {
                self.selectors.insert(route.id.clone(), RouteSelector::new(route.upstreams.clone()));
            }
        }
        self.rule.store(rule);
        self.limits.store(Arc::new(limits));
        self.compression.store(Arc::new(compression));
    }

    /// Swaps in a freshly-built rate limiter (component K rebuilds one
    /// `RateLimitManager` from the whole new rule list on every `apply`,
    /// since the Count-Min Sketch estimator is keyed across all rules, and
    /// hands each listener its new handle here).
    pub fn update_rate_limit(&self, rate_limit: Arc<RateLimitManager>) {
        self.rate_limit.store(rate_limit);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Runs the accept loop for one HTTP(S) listener until `cancel` fires.
/// Isolated per listener so a bind/accept failure on one never takes
/// down another (spec §1 "one bad listener must not crash the others").
pub async fn serve(
    state: Arc<HttpListenerState>,
    listener: TcpListener,
    tls: Option<Arc<ReloadingAcceptor>>,
    cancel: CancellationToken,
) -> crate::error::Result<()> {
    let builder = ConnBuilder::new(TokioExecutor::new());
    tracing::info!(listener = %state.listener_id, https = state.is_https, "HTTP listener accepting connections");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(listener = %state.listener_id, error = %e, "accept error");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                let tls = tls.clone();
                let builder = builder.clone();
                let conn_cancel = cancel.clone();
                state.active_connections.fetch_add(1, Ordering::Relaxed);
                state.observer.note_connection_delta(1);
                tokio::spawn(async move {
                    let _guard = ConnGuard(&state);
                    if let Err(e) = handle_connection(stream, peer, state.clone(), tls, builder, conn_cancel).await {
                        debug!(listener = %state.listener_id, peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }

    tracing::info!(listener = %state.listener_id, "HTTP listener stopped accepting");
    Ok(())
}

struct ConnGuard<'a>(&'a Arc<HttpListenerState>);
impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.0.observer.note_connection_delta(-1);
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: Arc<HttpListenerState>,
    tls: Option<Arc<ReloadingAcceptor>>,
    builder: ConnBuilder<TokioExecutor>,
    cancel: CancellationToken,
) -> crate::error::Result<()> {
    let is_https = state.is_https;
    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, std::convert::Infallible>(handle_request(req, peer, state, is_https).await) }
    });

    if let Some(acceptor) = tls {
        let tls_stream = match acceptor.current().accept(stream).await {
            Ok(s) => s,
            Err(e) => {
                return Err(crate::error::ProxyError::Tls(format!("handshake failed: {e}")));
            }
        };
        tokio::select! {
            result = builder.serve_connection(TokioIo::new(tls_stream), service) => {
                result.map_err(|e| crate::error::ProxyError::Http(e.to_string()))?;
            }
            _ = cancel.cancelled() => {}
        }
    } else {
        tokio::select! {
            result = builder.serve_connection(TokioIo::new(stream), service) => {
                result.map_err(|e| crate::error::ProxyError::Http(e.to_string()))?;
            }
            _ = cancel.cancelled() => {}
        }
    }
    Ok(())
}

/// The per-request pipeline. Never returns an `Err` — every failure is
/// turned into a status-coded response and an observation record, per
/// spec §7 "failures within a request are terminal for that request
/// only".
async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: Arc<HttpListenerState>,
    is_https: bool,
) -> Response<RespBody> {
    let start = Instant::now();
    let client_ip = peer.ip();
    let host = req.headers().get(http::header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let path_and_query = req.uri().path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| path.clone());
    let user_agent = req.headers().get(http::header::USER_AGENT).and_then(|v| v.to_str().ok()).map(String::from);
    let referer = req.headers().get(http::header::REFERER).and_then(|v| v.to_str().ok()).map(String::from);
    let bytes_in = req.headers().get(http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()).unwrap_or(0);

    let rule = state.rule.load_full();
    let limits = state.limits.load_full();
    let compression = state.compression.load_full();

    let (status, route_id, upstream_label, resp) = run_pipeline(
        req,
        client_ip,
        &host,
        &method,
        &path,
        &path_and_query,
        &rule,
        &limits,
        &compression,
        &state,
        is_https,
    )
    .await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let bytes_out = resp.size_hint().exact().unwrap_or(0);

    state.observer.observe(ObservedRecord {
        timestamp_unix_secs: crate::observer::record::now_unix_secs(),
        listener: state.listener_id.clone(),
        client_ip,
        peer_ip: peer.ip(),
        method: method.to_string(),
        host,
        path: path_and_query,
        status: status.as_u16(),
        upstream: upstream_label,
        route_id,
        latency_ms,
        bytes_in,
        bytes_out,
        user_agent,
        referer,
    });

    resp
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    req: Request<Incoming>,
    client_ip: std::net::IpAddr,
    host: &str,
    method: &http::Method,
    path: &str,
    path_and_query: &str,
    rule: &HttpRule,
    limits: &Limits,
    compression: &CompressionConfig,
    state: &Arc<HttpListenerState>,
    is_https: bool,
) -> (StatusCode, Option<String>, Option<String>, Response<RespBody>) {
    // Accepted → access control.
    let decision = state.access.is_allowed(client_ip, Protocol::Http);
    if !decision.is_allowed() {
        return finish(StatusCode::FORBIDDEN, None, None);
    }

    // → rate limit.
    if let Some(rl) = &rule.rate_limit {
        let result = state.rate_limit.load().check(&rule.id, client_ip, rl.ban_seconds);
        if result.is_limited() {
            return finish(StatusCode::TOO_MANY_REQUESTS, None, None);
        }
    }

    // → match.
    let Some(route) = crate::route_matcher::pick_route(rule, host, path, method, req.headers()) else {
        return finish(StatusCode::NOT_FOUND, None, None);
    };
    let route_id = route.id.clone();

    // → authenticate.
    if let Some(auth) = &rule.basic_auth {
        if !route.exclude_basic_auth && !basic_auth::check(req.headers(), auth) {
            return finish(StatusCode::UNAUTHORIZED, Some(route_id), None);
        }
    }

    // Static file short-circuit (attempted before touching the upstream
    // pool; a miss falls through to the normal upstream path).
    if let Some(dir) = &route.static_dir {
        if let Some(resp) = static_files::try_serve(dir, &route.path_prefix, path).await {
            return (resp.status(), Some(route_id), None, resp);
        }
        if route.upstreams.is_empty() {
            return finish(StatusCode::NOT_FOUND, Some(route_id), None);
        }
    }

    // → transform request, select upstream, forward, with passive-failure
    // aware failover across the route's candidates.
    let accept_encoding = req.headers().get(http::header::ACCEPT_ENCODING).and_then(|v| v.to_str().ok()).map(String::from);
    let scheme = if is_https { "https" } else { "http" };
    let ctx = HeaderContext { remote_addr: client_ip, host, scheme };
    let mut req = req;
    {
        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        apply_header_mutations(headers, &route.set_headers, &route.remove_headers, &ctx);
        set_forwarding_headers(headers, client_ip, scheme);
        if let Some(auth) = &rule.basic_auth {
            basic_auth::strip_if_not_forwarded(headers, auth);
        }
    }

    let (parts, body) = match forwarding::buffer_request(req, limits).await {
        Ok(v) => v,
        Err(e) => return finish(StatusCode::from(e), Some(route_id), None),
    };

    let req_content_type = parts.headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from);
    let body = forwarding::apply_body_replace(body, route.request_body_replace.as_ref(), req_content_type.as_deref());

    // `http::request::Parts` carries a non-`Clone` `Extensions` bag, so the
    // method/headers/version are captured once and a fresh `Parts` is
    // assembled per upstream attempt instead of cloning `parts` itself.
    let method = parts.method.clone();
    let headers_template = parts.headers.clone();
    let version = parts.version;

    let Some(selector) = state.selectors.get(&route_id) else {
        return finish(StatusCode::SERVICE_UNAVAILABLE, Some(route_id), None);
    };

    let attempts = selector.len().max(1);
    let mut last_err = None;
    for _ in 0..attempts {
        let Some(idx) = selector.pick() else { break };
        let Some(candidate) = selector.upstream(idx) else { break };
        let upstream_label = candidate.url.authority().map(|a| a.to_string()).unwrap_or_default();

        let uri = match forwarding::build_upstream_uri(&candidate.url, route, path_and_query) {
            Ok(u) => u,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        let http2 = limits.enable_http2 && version == http::Version::HTTP_2;

        let mut template = Request::new(());
        *template.method_mut() = method.clone();
        *template.uri_mut() = uri;
        *template.version_mut() = version;
        *template.headers_mut() = headers_template.clone();
        let (attempt_parts, _) = template.into_parts();

        match forwarding::forward_buffered(attempt_parts, body.clone(), &state.pool, limits, route.follow_redirects, http2).await {
            Ok(mut resp) => {
                selector.record_success(idx);
                strip_hop_by_hop(resp.headers_mut());
                let content_type =
                    resp.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(String::from);
                let resp =
                    apply_response_transform(resp, route, compression, content_type.as_deref(), accept_encoding.as_deref())
                        .await;
                let status = resp.status();
                return (status, Some(route_id), Some(upstream_label), resp);
            }
            Err(e) => {
                selector.record_failure(idx);
                last_err = Some(e);
            }
        }
    }

    let status = last_err.map(StatusCode::from).unwrap_or(StatusCode::BAD_GATEWAY);
    finish(status, Some(route_id), None)
}

async fn apply_response_transform(
    resp: Response<RespBody>,
    route: &HttpRoute,
    compression: &CompressionConfig,
    content_type: Option<&str>,
    accept_encoding: Option<&str>,
) -> Response<RespBody> {
    let (mut parts, body) = resp.into_parts();

    let Ok(collected) = body.collect().await else {
        return Response::from_parts(parts, bytes_body(Bytes::new()));
    };
    let mut bytes = collected.to_bytes();

    if let Some(rule) = &route.response_body_replace {
        bytes = forwarding::apply_body_replace(bytes, Some(rule), content_type);
    }

    let already_encoded = parts.headers.get(http::header::CONTENT_ENCODING).is_some();
    if !already_encoded && is_compressible(content_type) {
        let encoding = compression::negotiate(accept_encoding, compression, bytes.len() as u64);
        if encoding != Encoding::Identity {
            if let Ok(compressed) = compression::compress(bytes.clone(), encoding, compression).await {
                if let Some(value) = encoding.header_value() {
                    if let Ok(hv) = http::HeaderValue::from_str(value) {
                        parts.headers.insert(http::header::CONTENT_ENCODING, hv);
                        bytes = compressed;
                    }
                }
            }
        }
    }

    parts.headers.remove(http::header::CONTENT_LENGTH);
    if let Ok(len) = http::HeaderValue::from_str(&bytes.len().to_string()) {
        parts.headers.insert(http::header::CONTENT_LENGTH, len);
    }

    Response::from_parts(parts, bytes_body(bytes))
}

fn finish(status: StatusCode, route_id: Option<String>, upstream: Option<String>) -> (StatusCode, Option<String>, Option<String>, Response<RespBody>) {
    let resp = synthetic_error_response(status).unwrap_or_else(|_| Response::new(bytes_body(Bytes::new())));
    (status, route_id, upstream, resp)
}

pub fn connect_timeout(limits: &Limits) -> Duration {
    forwarding::connect_timeout(limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressible_content_types() {
        assert!(is_compressible(Some("text/html; charset=utf-8")));
        assert!(is_compressible(Some("application/json")));
        assert!(is_compressible(Some("image/svg+xml")));
        assert!(!is_compressible(Some("image/png")));
        assert!(!is_compressible(None));
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("content-type").is_some());
    }
}
