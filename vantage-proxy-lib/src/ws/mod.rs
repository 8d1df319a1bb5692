//! The WebSocket Proxy Engine (spec §4.I): HTTP upgrade handling,
//! bidirectional frame relay, and a heartbeat that closes dead upstream
//! connections.
//!
//! No teacher equivalent exists (the teacher never proxies WebSocket
//! traffic); the accept-loop/listener-state shape mirrors
//! [`crate::proxy`]'s HTTP engine (one `WsListenerState` per rule, routes
//! behind `ArcSwap` for hot reload, a per-connection task spawned off a
//! shared `TcpListener`), generalized to `tokio_tungstenite`'s
//! upgrade/relay primitives instead of `hyper`'s request/response cycle.

use crate::config::{WsRoute, WsRule};
use crate::observer::{ObservedRecord, Observer};
use crate::security::rate_limit::RateLimitManager;
use crate::security::{AccessControl, Protocol};
use crate::tls::ReloadingAcceptor;

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client sends a PING this often to detect a dead upstream; absent any
/// PONG for [`PONG_TIMEOUT`] the connection is torn down (spec §4.I
/// defaults: 30s / 90s).
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(90);

pub struct WsListenerState {
    pub listener_id: String,
    pub rule: ArcSwap<WsRule>,
    pub access: Arc<AccessControl>,
    pub rate_limit: ArcSwap<RateLimitManager>,
    pub observer: Arc<Observer>,
    pub is_wss: bool,
    active_connections: AtomicUsize,
}

impl WsListenerState {
    pub fn new(
        listener_id: String,
        rule: Arc<WsRule>,
        access: Arc<AccessControl>,
        rate_limit: Arc<RateLimitManager>,
        observer: Arc<Observer>,
        is_wss: bool,
    ) -> Self {
        Self {
            listener_id,
            rule: ArcSwap::from(rule),
            access,
            rate_limit: ArcSwap::from(rate_limit),
            observer,
            is_wss,
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn update(&self, rule: Arc<WsRule>) {
        self.rule.store(rule);
    }

    pub fn update_rate_limit(&self, rate_limit: Arc<RateLimitManager>) {
        self.rate_limit.store(rate_limit);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Picks the WS route with the longest matching path prefix, mirroring
/// [`crate::route_matcher::pick_route`]'s tie-break (declaration order)
/// but over the simpler `{path_prefix, upstream_url}` WS route shape.
fn pick_ws_route<'a>(rule: &'a WsRule, path: &str) -> Option<&'a WsRoute> {
    rule.routes.iter().filter(|r| path.starts_with(r.path_prefix.as_str())).max_by_key(|r| r.path_prefix.len())
}

/// Runs the accept loop for one WS(S) listener until `cancel` fires.
pub async fn serve(
    state: Arc<WsListenerState>,
    listener: TcpListener,
    tls: Option<Arc<ReloadingAcceptor>>,
    cancel: CancellationToken,
) -> crate::error::Result<()> {
    tracing::info!(listener = %state.listener_id, wss = state.is_wss, "WS listener accepting connections");
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
                let conn_cancel = cancel.clone();
                state.active_connections.fetch_add(1, Ordering::Relaxed);
                state.observer.note_connection_delta(1);
                tokio::spawn(async move {
                    let _guard = ConnGuard(&state);
                    if let Err(e) = handle_connection(stream, peer, state.clone(), tls, conn_cancel).await {
                        debug!(listener = %state.listener_id, peer = %peer, error = %e, "ws connection ended with error");
                    }
                });
            }
        }
    }
    tracing::info!(listener = %state.listener_id, "WS listener stopped accepting");
    Ok(())
}

struct ConnGuard<'a>(&'a Arc<WsListenerState>);
impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.0.observer.note_connection_delta(-1);
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: Arc<WsListenerState>,
    tls: Option<Arc<ReloadingAcceptor>>,
    cancel: CancellationToken,
) -> crate::error::Result<()> {
    let client_ip = peer.ip();
    let decision = state.access.is_allowed(client_ip, Protocol::Ws);
    if !decision.is_allowed() {
        observe(&state, peer, None, None, 403, Instant::now());
        return Ok(());
    }

    let rule = state.rule.load_full();
    if let Some(rl) = &rule.rate_limit {
        if state.rate_limit.load().check(&rule.id, client_ip, rl.ban_seconds).is_limited() {
            observe(&state, peer, None, None, 429, Instant::now());
            return Ok(());
        }
    }

    let matched: Arc<Mutex<Option<WsRoute>>> = Arc::new(Mutex::new(None));
    let matched_for_cb = Arc::clone(&matched);
    let rule_for_cb = Arc::clone(&rule);
    let callback = move |req: &HandshakeRequest, response: HandshakeResponse| {
        let path = req.uri().path();
        match pick_ws_route(&rule_for_cb, path) {
            Some(route) => {
                *matched_for_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(route.clone());
                Ok(response)
            }
            None => {
                let resp: ErrorResponse = HandshakeResponse::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(None)
                    .unwrap_or_else(|_| HandshakeResponse::new(None));
                Err(resp)
            }
        }
    };

    let start = Instant::now();

    let client_ws = if let Some(acceptor) = tls {
        let tls_stream = acceptor
            .current()
            .accept(stream)
            .await
            .map_err(|e| crate::error::ProxyError::Tls(format!("WS handshake TLS failed: {e}")))?;
        tokio_tungstenite::accept_hdr_async(tls_stream, callback)
            .await
            .map_err(|e| crate::error::ProxyError::Http(format!("WS upgrade failed: {e}")))?
    } else {
        tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| crate::error::ProxyError::Http(format!("WS upgrade failed: {e}")))?
    };

    let Some(route) = matched.lock().unwrap_or_else(|e| e.into_inner()).take() else {
        observe(&state, peer, None, None, 404, start);
        return Ok(());
    };

    let upstream_ws = match tokio_tungstenite::connect_async(route.upstream_url.to_string()).await {
        Ok((ws, _resp)) => ws,
        Err(e) => {
            warn!(listener = %state.listener_id, upstream = %route.upstream_url, error = %e, "failed to dial WS upstream");
            observe(&state, peer, Some(route.id.clone()), Some(route.upstream_url.to_string()), 502, start);
            return Ok(());
        }
    };

    let upstream_label = route.upstream_url.to_string();
    let result = relay(client_ws, upstream_ws, cancel).await;
    let status = if result.is_ok() { 101 } else { 1011 };
    observe(&state, peer, Some(route.id), Some(upstream_label), status, start);
    result
}

/// Bidirectional frame relay with a client-facing PING heartbeat. Each
/// side's `send` naturally applies backpressure against the underlying
/// TCP socket (spec §4.I "backpressure is honored by pausing the faster
/// side"); no additional buffering is introduced.
async fn relay<C, U>(client: C, upstream: U, cancel: CancellationToken) -> crate::error::Result<()>
where
    C: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
    U: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let mut ping_ticker = tokio::time::interval(DEFAULT_PING_INTERVAL);
    ping_ticker.tick().await; // first tick fires immediately; skip it
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client_tx.send(close_frame(1001, "shutting down")).await;
                break;
            }
            _ = ping_ticker.tick() => {
                if last_pong.elapsed() > DEFAULT_PONG_TIMEOUT {
                    let _ = client_tx.send(close_frame(1011, "pong timeout")).await;
                    return Err(crate::error::ProxyError::Http("websocket pong timeout".to_string()));
                }
                if client_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = client_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => { last_pong = Instant::now(); }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = upstream_tx.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(Ok(m)) => {
                        if upstream_tx.send(m).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
            msg = upstream_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        let _ = client_tx.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(Ok(m)) => {
                        if client_tx.send(m).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
    Ok(())
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() }))
}

#[allow(clippy::too_many_arguments)]
fn observe(
    state: &Arc<WsListenerState>,
    peer: SocketAddr,
    route_id: Option<String>,
    upstream: Option<String>,
    status: u16,
    start: Instant,
) {
    state.observer.observe(ObservedRecord {
        timestamp_unix_secs: crate::observer::record::now_unix_secs(),
        listener: state.listener_id.clone(),
        client_ip: peer.ip(),
        peer_ip: peer.ip(),
        method: "WS".to_string(),
        host: String::new(),
        path: String::new(),
        status,
        upstream,
        route_id,
        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        bytes_in: 0,
        bytes_out: 0,
        user_agent: None,
        referer: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;

    fn ws_route(id: &str, prefix: &str) -> WsRoute {
        WsRoute { id: id.to_string(), path_prefix: prefix.to_string(), upstream_url: "ws://backend:9000".parse::<Uri>().unwrap() }
    }

    #[test]
    fn longest_prefix_wins_for_ws_routes() {
        let rule = WsRule {
            id: "r".into(),
            enabled: true,
            listen_addrs: Default::default(),
            tls: None,
            rate_limit: None,
            routes: vec![ws_route("a", "/ws"), ws_route("b", "/ws/chat")],
        };
        let picked = pick_ws_route(&rule, "/ws/chat/room1").unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn no_route_matches_unrelated_path() {
        let rule = WsRule {
            id: "r".into(),
            enabled: true,
            listen_addrs: Default::default(),
            tls: None,
            rate_limit: None,
            routes: vec![ws_route("a", "/ws")],
        };
        assert!(pick_ws_route(&rule, "/other").is_none());
    }
}
