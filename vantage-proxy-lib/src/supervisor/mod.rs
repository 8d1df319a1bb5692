//! The Runtime Supervisor (spec §4.K): materializes listeners from a
//! `Config` snapshot, diffs successive snapshots keyed by
//! `(listen_addr, protocol)`, and exposes the control-API surface (§6) on
//! top of the HTTP, WebSocket and Stream engines.
//!
//! Generalizes the teacher's single `proxy::server::run` accept loop (one
//! `tokio::select!` over SIGTERM/SIGINT/accept/shutdown-timeout) into a
//! multi-listener table: one cancellation scope per bound socket instead
//! of one for the whole process, and an exponential-backoff restart loop
//! around each listener's accept loop since the teacher never needed to
//! recover from a failed bind.

mod control;
mod listener;

pub use control::{ConfigStore, FileConfigStore, RequestLogFilter};
pub use listener::{LifecycleEvent, ListenerKey, ListenerProtocol, ListenerStatus};

use crate::config::{Config, HttpRule, TcpOrUdp, WsRule};
use crate::observer::Observer;
use crate::pool::UpstreamPool;
use crate::proxy::HttpListenerState;
use crate::security::rate_limit::RateLimitManager;
use crate::security::AccessControl;
use crate::stream::{build_upstream_table, StreamListenerState, StreamUpstreamTable};
use crate::ws::WsListenerState;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use listener::{spawn_listener, stop_listener, PendingListener, RunningListener};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Top-level multi-listener runtime. Owns every bound socket's accept
/// loop and the shared collaborators (pool, access control, rate limits,
/// observer) that listener state structs are built from.
pub struct Supervisor {
    listeners: DashMap<ListenerKey, RunningListener>,
    http_states: DashMap<String, Arc<HttpListenerState>>,
    ws_states: DashMap<String, Arc<WsListenerState>>,
    stream_states: DashMap<ListenerKey, Arc<StreamListenerState>>,
    current_config: ArcSwap<Config>,
    events: mpsc::Sender<LifecycleEvent>,
    pool: ArcSwap<UpstreamPool>,
    access: Arc<AccessControl>,
    rate_limit: ArcSwap<RateLimitManager>,
    observer: Arc<Observer>,
}

impl Supervisor {
    pub fn new(observer: Arc<Observer>) -> (Arc<Self>, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor = Arc::new(Self {
            listeners: DashMap::new(),
            http_states: DashMap::new(),
            ws_states: DashMap::new(),
            stream_states: DashMap::new(),
            current_config: ArcSwap::from_pointee(empty_config()),
            events: tx,
            pool: ArcSwap::from_pointee(UpstreamPool::new(Duration::from_secs(5), 32, Duration::from_secs(90))),
            access: Arc::new(AccessControl::new(Default::default())),
            rate_limit: ArcSwap::from_pointee(RateLimitManager::new(&[])),
            observer,
        });
        supervisor.access.spawn_expiry_sweep(Duration::from_secs(30));
        spawn_maintenance(Arc::clone(&supervisor));
        (supervisor, rx)
    }

    /// Starts every enabled listener in `cfg` in parallel. Equivalent to
    /// [`Self::apply`] on an empty prior snapshot — every listener key is
    /// "new" the first time (spec §4.K "on first snapshot it starts all
    /// enabled listeners in parallel").
    pub async fn start(self: &Arc<Self>, cfg: Config) -> crate::error::Result<()> {
        self.apply(cfg).await
    }

    /// Computes the minimum diff between the currently running listeners
    /// and `cfg`'s desired set, keyed by `(listen_addr, protocol)`:
    /// unchanged keys get their listener state swapped in place, removed
    /// keys are drained and closed, new keys are bound and spawned.
    pub async fn apply(self: &Arc<Self>, cfg: Config) -> crate::error::Result<()> {
        self.access.update(cfg.access.clone());
        let rate_limit = Arc::new(RateLimitManager::from_config(&cfg.http_rules, &cfg.ws_rules));
        self.rate_limit.store(Arc::clone(&rate_limit));
        self.pool.store(Arc::new(UpstreamPool::new(
            Duration::from_millis(cfg.limits.connect_timeout_ms),
            cfg.limits.pool_max_idle,
            Duration::from_secs(cfg.limits.pool_idle_timeout_sec),
        )));

        let mut desired: std::collections::HashMap<ListenerKey, PendingListener> = std::collections::HashMap::new();
        let mut live_http_ids = HashSet::new();
        let mut live_ws_ids = HashSet::new();

        for rule in cfg.http_rules.iter().filter(|r| r.enabled) {
            live_http_ids.insert(rule.id.clone());
            let is_https = rule.tls.is_some();
            let protocol = if is_https { ListenerProtocol::Https } else { ListenerProtocol::Http };
            let state = self.ensure_http_state(rule, &cfg, Arc::clone(&rate_limit), is_https);
            for addr in &rule.listen_addrs {
                desired.insert(
                    ListenerKey { addr: *addr, protocol },
                    PendingListener::Http { state: Arc::clone(&state), tls: rule.tls.clone() },
                );
            }
        }

        if cfg.ws_enabled {
            for rule in cfg.ws_rules.iter().filter(|r| r.enabled) {
                live_ws_ids.insert(rule.id.clone());
                let is_wss = rule.tls.is_some();
                let protocol = if is_wss { ListenerProtocol::Wss } else { ListenerProtocol::Ws };
                let state = self.ensure_ws_state(rule, Arc::clone(&rate_limit), is_wss);
                for addr in &rule.listen_addrs {
                    desired.insert(
                        ListenerKey { addr: *addr, protocol },
                        PendingListener::Ws { state: Arc::clone(&state), tls: rule.tls.clone() },
                    );
                }
            }
        }

        if cfg.stream.enabled {
            let table: Arc<StreamUpstreamTable> = Arc::new(build_upstream_table(&cfg.stream));
            for server in cfg.stream.servers.iter().filter(|s| s.enabled) {
                let protocol = match server.protocol {
                    TcpOrUdp::Tcp => ListenerProtocol::Tcp,
                    TcpOrUdp::Udp => ListenerProtocol::Udp,
                };
                let addr = SocketAddr::from(([0, 0, 0, 0], server.listen_port));
                let key = ListenerKey { addr, protocol };
                let state = self.ensure_stream_state(&key, server, Arc::clone(&table));
                desired.insert(key, PendingListener::Stream { state });
            }
        }

        let removed: Vec<ListenerKey> =
            self.listeners.iter().map(|e| *e.key()).filter(|k| !desired.contains_key(k)).collect();
        for key in removed {
            self.remove_listener(key).await;
        }

        self.http_states.retain(|id, _| live_http_ids.contains(id));
        self.ws_states.retain(|id, _| live_ws_ids.contains(id));
        let desired_keys: HashSet<ListenerKey> = desired.keys().copied().collect();
        self.stream_states.retain(|key, _| desired_keys.contains(key));

        for (key, pending) in desired {
            if self.listeners.contains_key(&key) {
                continue;
            }
            let running = spawn_listener(key, pending, self.events.clone());
            self.listeners.insert(key, running);
        }

        self.current_config.store(Arc::new(cfg));
        Ok(())
    }

    /// Cancels every listener, giving each a bounded grace period to
    /// close its sockets before being aborted (spec §5 "5s grace").
    pub async fn stop(self: &Arc<Self>) {
        let keys: Vec<ListenerKey> = self.listeners.iter().map(|e| *e.key()).collect();
        for key in keys {
            self.remove_listener(key).await;
        }
    }

    pub fn status(&self) -> Vec<ListenerStatus> {
        self.listeners.iter().map(|e| e.value().status(*e.key())).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn get_listen_addrs(&self) -> Vec<ListenerKey> {
        self.listeners.iter().map(|e| *e.key()).collect()
    }

    pub fn access_control(&self) -> &Arc<AccessControl> {
        &self.access
    }

    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    pub fn current_config(&self) -> Arc<Config> {
        self.current_config.load_full()
    }

    async fn remove_listener(&self, key: ListenerKey) {
        if let Some((_, running)) = self.listeners.remove(&key) {
            stop_listener(running).await;
        }
    }

    fn ensure_http_state(
        &self,
        rule: &HttpRule,
        cfg: &Config,
        rate_limit: Arc<RateLimitManager>,
        is_https: bool,
    ) -> Arc<HttpListenerState> {
        if let Some(existing) = self.http_states.get(&rule.id) {
            existing.update(Arc::new(rule.clone()), cfg.limits.clone(), cfg.compression.clone());
            existing.update_rate_limit(rate_limit);
            return Arc::clone(&existing);
        }
        let state = Arc::new(HttpListenerState::new(
            rule.id.clone(),
            Arc::new(rule.clone()),
            cfg.limits.clone(),
            cfg.compression.clone(),
            self.pool.load_full(),
            Arc::clone(&self.access),
            rate_limit,
            Arc::clone(&self.observer),
            is_https,
        ));
        self.http_states.insert(rule.id.clone(), Arc::clone(&state));
        state
    }

    fn ensure_ws_state(&self, rule: &WsRule, rate_limit: Arc<RateLimitManager>, is_wss: bool) -> Arc<WsListenerState> {
        if let Some(existing) = self.ws_states.get(&rule.id) {
            existing.update(Arc::new(rule.clone()));
            existing.update_rate_limit(rate_limit);
            return Arc::clone(&existing);
        }
        let state = Arc::new(WsListenerState::new(
            rule.id.clone(),
            Arc::new(rule.clone()),
            Arc::clone(&self.access),
            rate_limit,
            Arc::clone(&self.observer),
            is_wss,
        ));
        self.ws_states.insert(rule.id.clone(), Arc::clone(&state));
        state
    }

    fn ensure_stream_state(
        &self,
        key: &ListenerKey,
        server: &crate::config::StreamServer,
        upstreams: Arc<StreamUpstreamTable>,
    ) -> Arc<StreamListenerState> {
        if let Some(existing) = self.stream_states.get(key) {
            existing.update(Arc::new(server.clone()), upstreams);
            return Arc::clone(&existing);
        }
        let state = Arc::new(StreamListenerState::new(
            format!("stream:{}:{}", key.addr, server.proxy_pass),
            Arc::new(server.clone()),
            upstreams,
            Arc::clone(&self.access),
            Arc::clone(&self.observer),
        ));
        self.stream_states.insert(*key, Arc::clone(&state));
        state
    }
}

fn spawn_maintenance(supervisor: Arc<Supervisor>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            supervisor.pool.load().sweep_idle();
            supervisor.rate_limit.load().sweep_expired_bans();
        }
    });
}

fn empty_config() -> Config {
    Config {
        http_rules: Vec::new(),
        ws_enabled: false,
        ws_rules: Vec::new(),
        stream: Default::default(),
        access: Default::default(),
        limits: crate::config::Limits {
            max_request_body: 10 * 1024 * 1024,
            max_response_body: 10 * 1024 * 1024,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            pool_max_idle: 32,
            pool_idle_timeout_sec: 90,
            enable_http2: true,
        },
        compression: crate::config::CompressionConfig {
            enabled: false,
            gzip: crate::config::GzipConfig { on: false, level: 6 },
            brotli: crate::config::BrotliConfig { on: false, level: 5 },
            min_length: 0,
        },
    }
}
