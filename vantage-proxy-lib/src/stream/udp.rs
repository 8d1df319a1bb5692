//! UDP session relay (spec §4.J, UDP half): a client-address-keyed
//! session table, each entry an ephemeral upstream socket plus a task
//! that reverse-forwards upstream datagrams back to the client. Sessions
//! expire after `idle_timeout`; the table is size-bounded with LRU
//! eviction, mirroring [`crate::pool::UpstreamPool`]'s origin table.

use super::StreamListenerState;
use crate::security::Protocol;

use dashmap::DashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const UDP_BUF_SIZE: usize = 64 * 1024;
const MAX_UDP_SESSIONS: usize = 8192;
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct UdpSession {
    upstream_socket: UdpSocket,
    last_seen_unix: AtomicI64,
    cancel: CancellationToken,
}

type SessionTable = DashMap<SocketAddr, Arc<UdpSession>>;

/// Runs the accept loop for one UDP stream listener until `cancel` fires.
/// A single bound socket serves every client; per-client state lives in
/// `sessions`, each with its own ephemeral upstream-facing socket.
pub async fn serve(state: Arc<StreamListenerState>, socket: UdpSocket, cancel: CancellationToken) -> crate::error::Result<()> {
    let socket = Arc::new(socket);
    let sessions: Arc<SessionTable> = Arc::new(DashMap::new());

    spawn_sweeper(Arc::clone(&state), Arc::clone(&sessions), cancel.clone());

    let mut buf = vec![0u8; UDP_BUF_SIZE];
    tracing::info!(listener = %state.listener_id, "UDP stream listener accepting datagrams");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = match received {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(listener = %state.listener_id, error = %e, "udp recv error");
                        continue;
                    }
                };
                if !state.access.is_allowed(peer.ip(), Protocol::Stream).is_allowed() {
                    continue;
                }

                let session = match sessions.get(&peer).map(|s| Arc::clone(&s)) {
                    Some(s) => s,
                    None => match open_session(&state, &socket, peer, &sessions).await {
                        Some(s) => s,
                        None => continue,
                    },
                };

                session.last_seen_unix.store(now_unix(), Ordering::Relaxed);
                if session.upstream_socket.send(&buf[..n]).await.is_err() {
                    sessions.remove(&peer);
                    session.cancel.cancel();
                }
            }
        }
    }
    tracing::info!(listener = %state.listener_id, "UDP stream listener stopped accepting");
    Ok(())
}

async fn open_session(
    state: &Arc<StreamListenerState>,
    downstream: &Arc<UdpSocket>,
    client_addr: SocketAddr,
    sessions: &Arc<SessionTable>,
) -> Option<Arc<UdpSession>> {
    let server = state.server.load_full();
    let upstreams = state.upstreams.load_full();
    let group = upstreams.get(&server.proxy_pass)?.clone();
    let idx = group.pick_excluding(&client_addr.ip(), &HashSet::new())?;
    let addr_string = group.member(idx)?.addr_string();

    let upstream_addr: SocketAddr = match tokio::net::lookup_host(&addr_string).await {
        Ok(mut it) => match it.next() {
            Some(a) => a,
            None => {
                group.record_failure(idx);
                return None;
            }
        },
        Err(e) => {
            warn!(listener = %state.listener_id, upstream = %addr_string, error = %e, "udp upstream resolve failed");
            group.record_failure(idx);
            return None;
        }
    };

    let bind_addr = if upstream_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let ephemeral = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!(listener = %state.listener_id, error = %e, "udp ephemeral bind failed");
            group.record_failure(idx);
            return None;
        }
    };
    if let Err(e) = ephemeral.connect(upstream_addr).await {
        warn!(listener = %state.listener_id, upstream = %upstream_addr, error = %e, "udp connect failed");
        group.record_failure(idx);
        return None;
    }
    group.record_success(idx);

    if sessions.len() >= MAX_UDP_SESSIONS {
        evict_coldest(sessions);
    }

    let session = Arc::new(UdpSession {
        upstream_socket: ephemeral,
        last_seen_unix: AtomicI64::new(now_unix()),
        cancel: CancellationToken::new(),
    });
    sessions.insert(client_addr, Arc::clone(&session));
    spawn_reverse_task(Arc::clone(state), client_addr, Arc::clone(downstream), Arc::clone(&session), Arc::clone(sessions));
    Some(session)
}

/// Reverse-forwards datagrams the ephemeral upstream socket receives back
/// to the client through the shared listener socket, until the session is
/// cancelled (by the sweeper, LRU eviction, or a forward failure) or the
/// upstream socket errors.
fn spawn_reverse_task(
    state: Arc<StreamListenerState>,
    client_addr: SocketAddr,
    downstream: Arc<UdpSocket>,
    session: Arc<UdpSession>,
    sessions: Arc<SessionTable>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; UDP_BUF_SIZE];
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                received = session.upstream_socket.recv(&mut buf) => {
                    match received {
                        Ok(n) => {
                            session.last_seen_unix.store(now_unix(), Ordering::Relaxed);
                            if downstream.send_to(&buf[..n], client_addr).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(listener = %state.listener_id, peer = %client_addr, error = %e, "udp upstream recv error");
                            break;
                        }
                    }
                }
            }
        }
        sessions.remove(&client_addr);
    });
}

fn spawn_sweeper(state: Arc<StreamListenerState>, sessions: Arc<SessionTable>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let idle_timeout = state.server.load().idle_timeout;
                    sweep_expired(&sessions, idle_timeout);
                }
            }
        }
    });
}

fn sweep_expired(sessions: &SessionTable, idle_timeout: Duration) {
    let cutoff = now_unix() - idle_timeout.as_secs() as i64;
    let expired: Vec<SocketAddr> =
        sessions.iter().filter(|e| e.value().last_seen_unix.load(Ordering::Relaxed) < cutoff).map(|e| *e.key()).collect();
    for addr in expired {
        if let Some((_, session)) = sessions.remove(&addr) {
            session.cancel.cancel();
        }
    }
}

fn evict_coldest(sessions: &SessionTable) {
    let oldest =
        sessions.iter().min_by_key(|e| e.value().last_seen_unix.load(Ordering::Relaxed)).map(|e| *e.key());
    if let Some(addr) = oldest {
        if let Some((_, session)) = sessions.remove(&addr) {
            session.cancel.cancel();
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
