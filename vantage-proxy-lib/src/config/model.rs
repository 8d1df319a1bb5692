//! The statically-typed, immutable `Config` snapshot. Every downstream
//! component (B through L) consumes these types and never reads the raw
//! TOML shape directly — defaults and normalization happen once, at the
//! validator boundary (spec §9 "dynamic typing in the wire config").

use http::{Method, Uri};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_rules: Vec<HttpRule>,
    pub ws_enabled: bool,
    pub ws_rules: Vec<WsRule>,
    pub stream: StreamConfig,
    pub access: AccessConfig,
    pub limits: Limits,
    pub compression: CompressionConfig,
}

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_request_body: u64,
    pub max_response_body: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub pool_max_idle: usize,
    pub pool_idle_timeout_sec: u64,
    pub enable_http2: bool,
}

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub gzip: GzipConfig,
    pub brotli: BrotliConfig,
    pub min_length: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct GzipConfig {
    pub on: bool,
    pub level: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BrotliConfig {
    pub on: bool,
    pub level: u32,
}

#[derive(Debug, Clone)]
pub struct HttpRule {
    pub id: String,
    pub enabled: bool,
    pub listen_addrs: BTreeSet<SocketAddr>,
    pub tls: Option<TlsMaterial>,
    pub basic_auth: Option<BasicAuth>,
    pub rate_limit: Option<RateLimitRule>,
    pub routes: Vec<HttpRoute>,
}

#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub pass: String,
    pub forward: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub rps: u32,
    pub burst: u32,
    pub ban_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct HttpRoute {
    pub id: String,
    pub enabled: bool,
    pub host: HostMatch,
    pub path_prefix: String,
    pub methods: BTreeSet<Method>,
    pub required_headers: BTreeMap<String, String>,
    pub exclude_basic_auth: bool,
    pub follow_redirects: bool,
    pub proxy_pass_path: Option<String>,
    pub static_dir: Option<PathBuf>,
    pub set_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
    pub url_rewrites: Vec<UrlRewrite>,
    pub request_body_replace: Option<BodyReplace>,
    pub response_body_replace: Option<BodyReplace>,
    pub upstreams: Vec<WeightedUpstream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostMatch {
    #[default]
    Any,
    Exact(String),
    WildcardSuffix(String),
}

impl HostMatch {
    pub fn matches(&self, host: &str) -> bool {
        let host = host.split(':').next().unwrap_or(host);
        match self {
            HostMatch::Any => true,
            HostMatch::Exact(h) => h.eq_ignore_ascii_case(host),
            HostMatch::WildcardSuffix(suffix) => {
                host.len() > suffix.len()
                    && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UrlRewrite {
    pub regex: Regex,
    pub replacement: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct BodyReplace {
    pub find: String,
    pub replace: String,
    pub use_regex: bool,
    pub regex: Option<Regex>,
    pub enabled: bool,
    pub content_types: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct WeightedUpstream {
    pub url: Uri,
    pub weight: u32,
}

#[derive(Debug, Clone)]
pub struct WsRule {
    pub id: String,
    pub enabled: bool,
    pub listen_addrs: BTreeSet<SocketAddr>,
    pub tls: Option<TlsMaterial>,
    pub rate_limit: Option<RateLimitRule>,
    pub routes: Vec<WsRoute>,
}

#[derive(Debug, Clone)]
pub struct WsRoute {
    pub id: String,
    pub path_prefix: String,
    pub upstream_url: Uri,
}

#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub upstreams: BTreeMap<String, StreamUpstream>,
    pub servers: Vec<StreamServer>,
}

#[derive(Debug, Clone)]
pub struct StreamUpstream {
    pub hash_key: HashKey,
    pub members: Vec<WeightedMember>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashKey {
    #[default]
    ClientAddress,
}

#[derive(Debug, Clone)]
pub struct WeightedMember {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl WeightedMember {
    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOrUdp {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct StreamServer {
    pub enabled: bool,
    pub listen_port: u16,
    pub protocol: TcpOrUdp,
    pub proxy_pass: String,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AccessConfig {
    pub http_enabled: bool,
    pub ws_enabled: bool,
    pub stream_enabled: bool,
    pub allow_all_lan: bool,
    pub allow_all_public: bool,
    pub whitelist: Vec<ipnet::IpNet>,
    pub blacklist: Vec<BlacklistEntry>,
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub ip: IpAddr,
    pub reason: String,
    pub expires_at: u64,
    pub created_at: u64,
}

impl BlacklistEntry {
    /// Invariant 7: active iff `expires_at == 0` (permanent) or `now < expires_at`.
    pub fn is_active(&self, now_unix_secs: u64) -> bool {
        self.expires_at == 0 || now_unix_secs < self.expires_at
    }
}
