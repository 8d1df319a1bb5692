//! Wire format for the persisted TOML configuration.
//!
//! Every field mirrors [`crate::config::model::Config`] but stays loosely
//! typed (plain `String`s for durations, hosts, regexes) and optional with
//! `#[serde(default)]`, the way the teacher's `config/*.rs` structs default
//! each field independently. [`crate::config::validate`] is the only place
//! that turns this into the statically-typed domain model.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub http_rules: Vec<RawHttpRule>,
    #[serde(default)]
    pub ws_enabled: bool,
    #[serde(default)]
    pub ws_rules: Vec<RawWsRule>,
    #[serde(default)]
    pub stream: RawStreamConfig,
    #[serde(default)]
    pub access: RawAccessConfig,
    #[serde(default)]
    pub limits: RawLimits,
    #[serde(default)]
    pub compression: RawCompressionConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawHttpRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Accepts either a `listen_addr` singleton or a `listen_addrs` list, per
    /// the validator's defaulting rule in spec §4.A.
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub listen_addrs: Vec<String>,
    #[serde(default)]
    pub tls: Option<RawTlsMaterial>,
    #[serde(default)]
    pub basic_auth: Option<RawBasicAuth>,
    #[serde(default)]
    pub rate_limit: Option<RawRateLimitRule>,
    #[serde(default)]
    pub routes: Vec<RawHttpRoute>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawTlsMaterial {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBasicAuth {
    pub user: String,
    pub pass: String,
    #[serde(default)]
    pub forward: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawRateLimitRule {
    pub rps: u32,
    pub burst: u32,
    #[serde(default)]
    pub ban_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawHttpRoute {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub required_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub exclude_basic_auth: bool,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub proxy_pass_path: Option<String>,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub set_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_headers: Vec<String>,
    #[serde(default)]
    pub url_rewrites: Vec<RawUrlRewrite>,
    #[serde(default)]
    pub request_body_replace: Option<RawBodyReplace>,
    #[serde(default)]
    pub response_body_replace: Option<RawBodyReplace>,
    #[serde(default)]
    pub upstreams: Vec<RawWeightedUpstream>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawUrlRewrite {
    pub regex: String,
    pub replacement: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBodyReplace {
    pub find: String,
    pub replace: String,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawWeightedUpstream {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawWsRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub listen_addrs: Vec<String>,
    #[serde(default)]
    pub tls: Option<RawTlsMaterial>,
    #[serde(default)]
    pub rate_limit: Option<RawRateLimitRule>,
    #[serde(default)]
    pub routes: Vec<RawWsRoute>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawWsRoute {
    #[serde(default)]
    pub id: Option<String>,
    pub path: String,
    pub upstream_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawStreamConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub upstreams: BTreeMap<String, RawStreamUpstream>,
    #[serde(default)]
    pub servers: Vec<RawStreamServer>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawStreamUpstream {
    #[serde(default = "default_hash_key")]
    pub hash_key: String,
    pub members: Vec<RawWeightedMember>,
    /// Reserved per spec §9 Open Questions; read but never consulted —
    /// consistent hashing is the only selection mode.
    #[serde(default)]
    pub consistent: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawWeightedMember {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawStreamServer {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub listen_port: u16,
    pub protocol: String,
    pub proxy_pass: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawAccessConfig {
    #[serde(default = "default_true")]
    pub http_enabled: bool,
    #[serde(default = "default_true")]
    pub ws_enabled: bool,
    #[serde(default = "default_true")]
    pub stream_enabled: bool,
    #[serde(default)]
    pub allow_all_lan: bool,
    #[serde(default = "default_true")]
    pub allow_all_public: bool,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<RawBlacklistEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBlacklistEntry {
    pub ip: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub created_at: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawLimits {
    #[serde(default = "default_max_request_body")]
    pub max_request_body: u64,
    #[serde(default = "default_max_response_body")]
    pub max_response_body: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
    #[serde(default = "default_pool_idle_timeout_sec")]
    pub pool_idle_timeout_sec: u64,
    #[serde(default = "default_true")]
    pub enable_http2: bool,
}

impl Default for RawLimits {
    fn default() -> Self {
        Self {
            max_request_body: default_max_request_body(),
            max_response_body: default_max_response_body(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pool_max_idle: default_pool_max_idle(),
            pool_idle_timeout_sec: default_pool_idle_timeout_sec(),
            enable_http2: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawCompressionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gzip: RawGzipConfig,
    #[serde(default)]
    pub brotli: RawBrotliConfig,
    #[serde(default = "default_min_length")]
    pub min_length: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawGzipConfig {
    #[serde(default = "default_true")]
    pub on: bool,
    #[serde(default = "default_gzip_level")]
    pub level: u32,
}

impl Default for RawGzipConfig {
    fn default() -> Self {
        Self { on: true, level: default_gzip_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBrotliConfig {
    #[serde(default = "default_true")]
    pub on: bool,
    #[serde(default = "default_brotli_level")]
    pub level: u32,
}

impl Default for RawBrotliConfig {
    fn default() -> Self {
        Self { on: true, level: default_brotli_level() }
    }
}

fn default_true() -> bool {
    true
}
fn default_weight() -> u32 {
    1
}
fn default_hash_key() -> String {
    "$remote_addr".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    60_000
}
fn default_stream_idle_timeout_secs() -> u64 {
    300
}
fn default_pool_max_idle() -> usize {
    32
}
fn default_pool_idle_timeout_sec() -> u64 {
    90
}
fn default_max_request_body() -> u64 {
    10 * 1024 * 1024
}
fn default_max_response_body() -> u64 {
    10 * 1024 * 1024
}
fn default_min_length() -> u64 {
    256
}
fn default_gzip_level() -> u32 {
    6
}
fn default_brotli_level() -> u32 {
    5
}
