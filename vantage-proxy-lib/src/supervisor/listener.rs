//! Per-listener lifecycle: binding, the backoff-retrying accept loop, and
//! bounded-grace drain on removal (spec §4.K, §5, §7).

use crate::config::TlsMaterial;
use crate::proxy::{self, HttpListenerState};
use crate::stream::{self, StreamListenerState};
use crate::tls::ReloadingAcceptor;
use crate::ws::{self, WsListenerState};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DRAIN_GRACE: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerProtocol {
    Http,
    Https,
    Ws,
    Wss,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub addr: SocketAddr,
    pub protocol: ListenerProtocol,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ListenerUp { addr: SocketAddr, protocol: ListenerProtocol },
    ListenerDown { addr: SocketAddr, protocol: ListenerProtocol },
    ListenerError { addr: SocketAddr, protocol: ListenerProtocol, reason: String },
}

#[derive(Debug, Clone)]
pub struct ListenerStatus {
    pub addr: SocketAddr,
    pub protocol: ListenerProtocol,
    pub up: bool,
    pub last_error: Option<String>,
}

pub enum PendingListener {
    Http { state: Arc<HttpListenerState>, tls: Option<TlsMaterial> },
    Ws { state: Arc<WsListenerState>, tls: Option<TlsMaterial> },
    Stream { state: Arc<StreamListenerState> },
}

pub struct RunningListener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl RunningListener {
    pub fn status(&self, key: ListenerKey) -> ListenerStatus {
        let last_error = self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone();
        ListenerStatus { addr: key.addr, protocol: key.protocol, up: last_error.is_none(), last_error }
    }
}

/// Binds and spawns the accept loop for one listener key, wrapped in a
/// restart loop with exponential backoff on bind or accept-loop failure.
pub fn spawn_listener(key: ListenerKey, pending: PendingListener, events: mpsc::Sender<LifecycleEvent>) -> RunningListener {
    let cancel = CancellationToken::new();
    let last_error = Arc::new(Mutex::new(None));
    let task_cancel = cancel.clone();
    let task_last_error = Arc::clone(&last_error);

    let task = tokio::spawn(async move {
        match pending {
            PendingListener::Http { state, tls } => {
                run_http(key, state, tls, task_cancel, events, task_last_error).await
            }
            PendingListener::Ws { state, tls } => run_ws(key, state, tls, task_cancel, events, task_last_error).await,
            PendingListener::Stream { state } => run_stream(key, state, task_cancel, events, task_last_error).await,
        }
    });

    RunningListener { cancel, task, last_error }
}

/// Cancels the listener and waits up to [`DRAIN_GRACE`] for its accept
/// loop to return cleanly before aborting it.
pub async fn stop_listener(running: RunningListener) {
    running.cancel.cancel();
    let grace = tokio::time::sleep(DRAIN_GRACE);
    tokio::pin!(grace);
    tokio::select! {
        _ = &mut grace => running.task.abort(),
        res = running.task => { let _ = res; }
    }
}

async fn report_error(
    key: ListenerKey,
    events: &mpsc::Sender<LifecycleEvent>,
    last_error: &Mutex<Option<String>>,
    reason: String,
) {
    warn!(addr = %key.addr, protocol = ?key.protocol, %reason, "listener error");
    *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());
    let _ = events.send(LifecycleEvent::ListenerError { addr: key.addr, protocol: key.protocol, reason }).await;
}

/// Sleeps for the current backoff (unless cancelled first), doubling it
/// up to [`MAX_BACKOFF`]. Returns `true` if cancellation fired while
/// waiting, telling the caller to stop retrying.
async fn wait_backoff(cancel: &CancellationToken, backoff: &mut Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(*backoff) => {
            *backoff = (*backoff * 2).min(MAX_BACKOFF);
            false
        }
    }
}

async fn run_http(
    key: ListenerKey,
    state: Arc<HttpListenerState>,
    tls_material: Option<TlsMaterial>,
    cancel: CancellationToken,
    events: mpsc::Sender<LifecycleEvent>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut backoff = INITIAL_BACKOFF;
    while !cancel.is_cancelled() {
        let tls = match &tls_material {
            Some(material) => match ReloadingAcceptor::spawn(material.clone()) {
                Ok(acceptor) => Some(Arc::new(acceptor)),
                Err(e) => {
                    report_error(key, &events, &last_error, format!("tls init failed: {e}")).await;
                    if wait_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            },
            None => None,
        };

        let listener = match TcpListener::bind(key.addr).await {
            Ok(l) => l,
            Err(e) => {
                report_error(key, &events, &last_error, format!("bind failed: {e}")).await;
                if wait_backoff(&cancel, &mut backoff).await {
                    break;
                }
                continue;
            }
        };

        backoff = INITIAL_BACKOFF;
        *last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let _ = events.send(LifecycleEvent::ListenerUp { addr: key.addr, protocol: key.protocol }).await;
        if let Err(e) = proxy::serve(state.clone(), listener, tls, cancel.clone()).await {
            report_error(key, &events, &last_error, e.to_string()).await;
        }
        let _ = events.send(LifecycleEvent::ListenerDown { addr: key.addr, protocol: key.protocol }).await;
        if cancel.is_cancelled() || wait_backoff(&cancel, &mut backoff).await {
            break;
        }
    }
}

async fn run_ws(
    key: ListenerKey,
    state: Arc<WsListenerState>,
    tls_material: Option<TlsMaterial>,
    cancel: CancellationToken,
    events: mpsc::Sender<LifecycleEvent>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut backoff = INITIAL_BACKOFF;
    while !cancel.is_cancelled() {
        let tls = match &tls_material {
            Some(material) => match ReloadingAcceptor::spawn(material.clone()) {
                Ok(acceptor) => Some(Arc::new(acceptor)),
                Err(e) => {
                    report_error(key, &events, &last_error, format!("tls init failed: {e}")).await;
                    if wait_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            },
            None => None,
        };

        let listener = match TcpListener::bind(key.addr).await {
            Ok(l) => l,
            Err(e) => {
                report_error(key, &events, &last_error, format!("bind failed: {e}")).await;
                if wait_backoff(&cancel, &mut backoff).await {
                    break;
                }
                continue;
            }
        };

        backoff = INITIAL_BACKOFF;
        *last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let _ = events.send(LifecycleEvent::ListenerUp { addr: key.addr, protocol: key.protocol }).await;
        if let Err(e) = ws::serve(state.clone(), listener, tls, cancel.clone()).await {
            report_error(key, &events, &last_error, e.to_string()).await;
        }
        let _ = events.send(LifecycleEvent::ListenerDown { addr: key.addr, protocol: key.protocol }).await;
        if cancel.is_cancelled() || wait_backoff(&cancel, &mut backoff).await {
            break;
        }
    }
}

async fn run_stream(
    key: ListenerKey,
    state: Arc<StreamListenerState>,
    cancel: CancellationToken,
    events: mpsc::Sender<LifecycleEvent>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut backoff = INITIAL_BACKOFF;
    while !cancel.is_cancelled() {
        let bind_err = match key.protocol {
            ListenerProtocol::Tcp => match TcpListener::bind(key.addr).await {
                Ok(listener) => {
                    backoff = INITIAL_BACKOFF;
                    *last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                    let _ = events.send(LifecycleEvent::ListenerUp { addr: key.addr, protocol: key.protocol }).await;
                    if let Err(e) = stream::tcp::serve(state.clone(), listener, cancel.clone()).await {
                        report_error(key, &events, &last_error, e.to_string()).await;
                    }
                    None
                }
                Err(e) => Some(e),
            },
            ListenerProtocol::Udp => match UdpSocket::bind(key.addr).await {
                Ok(socket) => {
                    backoff = INITIAL_BACKOFF;
                    *last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                    let _ = events.send(LifecycleEvent::ListenerUp { addr: key.addr, protocol: key.protocol }).await;
                    if let Err(e) = stream::udp::serve(state.clone(), socket, cancel.clone()).await {
                        report_error(key, &events, &last_error, e.to_string()).await;
                    }
                    None
                }
                Err(e) => Some(e),
            },
            _ => unreachable!("stream listeners are always Tcp or Udp"),
        };

        if let Some(e) = bind_err {
            report_error(key, &events, &last_error, format!("bind failed: {e}")).await;
            if wait_backoff(&cancel, &mut backoff).await {
                break;
            }
            continue;
        }

        let _ = events.send(LifecycleEvent::ListenerDown { addr: key.addr, protocol: key.protocol }).await;
        if cancel.is_cancelled() || wait_backoff(&cancel, &mut backoff).await {
            break;
        }
    }
}
