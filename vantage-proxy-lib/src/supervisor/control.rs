//! Control API surface (spec §6): config persistence, blacklist
//! management, and log/metric queries layered on top of [`super::Supervisor`].
//!
//! `save_config` works against raw TOML text rather than a serialized
//! [`crate::config::Config`] — the validated domain model embeds
//! `regex::Regex` and `http::Uri`, neither of which round-trips through
//! `serde::Serialize` the way the wire-format `RawConfig` does. A config
//! store that only ever reads/writes the text a human or management UI
//! edits keeps this crate out of the business of inventing a serialization
//! scheme the wire format doesn't already provide.

use super::Supervisor;
use crate::config::{self, BlacklistEntry, Config};
use crate::error::Result;
use crate::observer::{metrics::Bucket, ObservedRecord};

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Reads and writes the persisted configuration text a [`Supervisor`]
/// reloads from. Kept as a trait so embedding applications can back it
/// with something other than a local file (e.g. a management database)
/// without this crate needing to know about it.
pub trait ConfigStore: Send + Sync {
    fn get_config(&self) -> Result<String>;
    fn save_config(&self, raw_toml: &str) -> Result<()>;
}

/// The default [`ConfigStore`]: a single TOML file on disk.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn get_config(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn save_config(&self, raw_toml: &str) -> Result<()> {
        // Validate before persisting so a bad write never leaves the
        // on-disk config unreadable for the next startup or reload.
        config::load_from_str(raw_toml)?;
        std::fs::write(&self.path, raw_toml)?;
        Ok(())
    }
}

/// Filter for the request-log query control-API call. `None` on any field
/// means "don't filter on this dimension".
#[derive(Debug, Clone, Default)]
pub struct RequestLogFilter {
    pub listener: Option<String>,
    pub min_status: Option<u16>,
    pub client_ip: Option<IpAddr>,
    pub limit: Option<usize>,
}

impl RequestLogFilter {
    fn matches(&self, record: &ObservedRecord) -> bool {
        if let Some(listener) = &self.listener {
            if &record.listener != listener {
                return false;
            }
        }
        if let Some(min_status) = self.min_status {
            if record.status < min_status {
                return false;
            }
        }
        if let Some(ip) = self.client_ip {
            if record.client_ip != ip {
                return false;
            }
        }
        true
    }
}

impl Supervisor {
    /// Loads a config snapshot from `store` and applies it, used both at
    /// startup and by `reload_config`.
    pub async fn load_and_apply(self: &Arc<Self>, store: &dyn ConfigStore) -> Result<()> {
        let raw = store.get_config()?;
        let cfg: Config = config::load_from_str(&raw)?;
        self.apply(cfg).await
    }

    pub fn blacklist_add(&self, ip: IpAddr, reason: String, duration_sec: u64) {
        self.access_control().blacklist_add(ip, reason, duration_sec);
    }

    pub fn blacklist_remove(&self, ip: IpAddr) {
        self.access_control().blacklist_remove(ip);
    }

    pub fn blacklist_list(&self) -> Vec<BlacklistEntry> {
        self.access_control().blacklist_list()
    }

    pub fn blacklist_cache_refresh(&self) {
        self.access_control().blacklist_cache_refresh();
    }

    /// Every listener's current rolling time-series snapshot.
    pub fn get_metrics(&self) -> Vec<(String, Vec<Bucket>, Vec<Bucket>)> {
        self.observer().all_listener_metrics()
    }

    /// A single listener's rolling time-series snapshot, for the
    /// historical-metrics control-API call scoped to one listener.
    pub fn query_historical_metrics(&self, listener: &str) -> Option<(Vec<Bucket>, Vec<Bucket>)> {
        self.observer().listener_metrics_snapshot(listener)
    }

    /// Records still sitting in the not-yet-flushed queue. Does not reach
    /// into the external sink's persisted history (spec §1 scope).
    pub fn get_logs(&self) -> Vec<ObservedRecord> {
        self.observer().queued_records()
    }

    pub fn clear_logs(&self) {
        self.observer().clear_queued_records();
    }

    pub fn query_request_logs(&self, filter: &RequestLogFilter) -> Vec<ObservedRecord> {
        let mut matched: Vec<ObservedRecord> =
            self.observer().queued_records().into_iter().filter(|r| filter.matches(r)).collect();
        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                let start = matched.len() - limit;
                matched = matched.split_off(start);
            }
        }
        matched
    }

    /// Toggles a listen rule without a full config reload, used by
    /// management UIs for a quick enable/disable. Takes effect on the
    /// next `apply` — callers should follow this with a `load_and_apply`
    /// or re-`apply` of the current config for it to take effect
    /// immediately, since this only flips the in-memory flag the next
    /// diff reads.
    pub fn set_listen_rule_enabled(self: &Arc<Self>, rule_id: &str, enabled: bool) -> bool {
        let mut cfg = (*self.current_config()).clone();
        let mut found = false;
        for rule in cfg.http_rules.iter_mut() {
            if rule.id == rule_id {
                rule.enabled = enabled;
                found = true;
            }
        }
        for rule in cfg.ws_rules.iter_mut() {
            if rule.id == rule_id {
                rule.enabled = enabled;
                found = true;
            }
        }
        if found {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let _ = supervisor.apply(cfg).await;
            });
        }
        found
    }

    /// Toggles a single route within an HTTP rule without a full reload.
    pub fn set_route_enabled(self: &Arc<Self>, rule_id: &str, route_id: &str, enabled: bool) -> bool {
        let mut cfg = (*self.current_config()).clone();
        let mut found = false;
        for rule in cfg.http_rules.iter_mut() {
            if rule.id != rule_id {
                continue;
            }
            for route in rule.routes.iter_mut() {
                if route.id == route_id {
                    route.enabled = enabled;
                    found = true;
                }
            }
        }
        if found {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let _ = supervisor.apply(cfg).await;
            });
        }
        found
    }
}
