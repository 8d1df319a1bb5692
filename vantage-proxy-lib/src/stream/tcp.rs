//! Raw TCP passthrough (spec §4.J, TCP half): accept, authorize, pick an
//! upstream by client-address hash, dial, then splice bytes until either
//! side closes or both directions have been idle for `idle_timeout`.

use super::StreamListenerState;
use crate::security::Protocol;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Runs the accept loop for one TCP stream listener until `cancel` fires.
pub async fn serve(
    state: Arc<StreamListenerState>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> crate::error::Result<()> {
    tracing::info!(listener = %state.listener_id, "TCP stream listener accepting connections");
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
                let _ = stream.set_nodelay(true);
                let state = Arc::clone(&state);
                state.inc_connections();
                tokio::spawn(async move {
                    let _guard = ConnGuard(&state);
                    if let Err(e) = handle_connection(stream, peer, state.clone()).await {
                        debug!(listener = %state.listener_id, peer = %peer, error = %e, "tcp stream ended with error");
                    }
                });
            }
        }
    }
    tracing::info!(listener = %state.listener_id, "TCP stream listener stopped accepting");
    Ok(())
}

struct ConnGuard<'a>(&'a Arc<StreamListenerState>);
impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        self.0.dec_connections();
    }
}

async fn handle_connection(client: TcpStream, peer: SocketAddr, state: Arc<StreamListenerState>) -> crate::error::Result<()> {
    let start = Instant::now();
    let client_ip = peer.ip();

    if !state.access.is_allowed(client_ip, Protocol::Stream).is_allowed() {
        observe(&state, peer, None, 0, start, 0, 0);
        return Ok(());
    }

    let server = state.server.load_full();
    let upstreams = state.upstreams.load_full();
    let Some(group) = upstreams.get(&server.proxy_pass).cloned() else {
        warn!(listener = %state.listener_id, proxy_pass = %server.proxy_pass, "no such stream upstream group");
        observe(&state, peer, Some(server.proxy_pass.clone()), 0, start, 0, 0);
        return Ok(());
    };

    let mut tried = HashSet::new();
    let member_count = group.len().max(1);
    for _ in 0..member_count {
        let Some(idx) = group.pick_excluding(&client_ip, &tried) else { break };
        tried.insert(idx);
        let Some(member) = group.member(idx) else { continue };
        let addr = member.addr_string();

        match tokio::time::timeout(server.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(upstream)) => {
                let _ = upstream.set_nodelay(true);
                group.record_success(idx);
                let (bytes_in, bytes_out) = splice(client, upstream, server.idle_timeout).await.unwrap_or((0, 0));
                observe(&state, peer, Some(server.proxy_pass.clone()), 1, start, bytes_in, bytes_out);
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(listener = %state.listener_id, upstream = %addr, error = %e, "tcp dial failed");
                group.record_failure(idx);
            }
            Err(_) => {
                warn!(listener = %state.listener_id, upstream = %addr, "tcp dial timed out");
                group.record_failure(idx);
            }
        }
    }

    observe(&state, peer, Some(server.proxy_pass.clone()), 0, start, 0, 0);
    Ok(())
}

/// Bidirectional byte copy with a per-direction idle timeout.
/// `tokio::io::copy_bidirectional` has no idle-timeout support, so each
/// direction runs its own read/write loop and the two race to completion;
/// either EOF or `idle_timeout` elapsing with no bytes read ends that
/// direction and triggers a half-close on its peer.
async fn splice(mut client: TcpStream, mut upstream: TcpStream, idle_timeout: Duration) -> std::io::Result<(u64, u64)> {
    let (mut cr, mut cw) = client.split();
    let (mut ur, mut uw) = upstream.split();
    let client_to_upstream = copy_with_idle_timeout(&mut cr, &mut uw, idle_timeout);
    let upstream_to_client = copy_with_idle_timeout(&mut ur, &mut cw, idle_timeout);
    let (bytes_in, bytes_out) = tokio::join!(client_to_upstream, upstream_to_client);
    Ok((bytes_in?, bytes_out?))
}

async fn copy_with_idle_timeout<R, W>(reader: &mut R, writer: &mut W, idle_timeout: Duration) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let read = match tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        };
        writer.write_all(&buf[..read]).await?;
        total += read as u64;
    }
    let _ = writer.shutdown().await;
    Ok(total)
}

fn observe(
    state: &Arc<StreamListenerState>,
    peer: SocketAddr,
    upstream: Option<String>,
    status: u16,
    start: Instant,
    bytes_in: u64,
    bytes_out: u64,
) {
    state.observer.observe(crate::observer::ObservedRecord {
        timestamp_unix_secs: crate::observer::record::now_unix_secs(),
        listener: state.listener_id.clone(),
        client_ip: peer.ip(),
        peer_ip: peer.ip(),
        method: "TCP".to_string(),
        host: String::new(),
        path: String::new(),
        status,
        upstream,
        route_id: None,
        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        bytes_in,
        bytes_out,
        user_agent: None,
        referer: None,
    });
}
