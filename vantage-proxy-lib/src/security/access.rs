//! Access control decisions for HTTP, WebSocket and stream listeners
//! (spec §4.F), generalizing the teacher's CIDR allow/deny matcher
//! (`ip_filter::is_ip_allowed`) with the blacklist-with-expiry and
//! LAN/public split the new config model adds.
//!
//! Decision order, most specific first:
//! 1. An active blacklist entry for the IP always denies.
//! 2. A whitelist CIDR match always allows.
//! 3. `allow_all_lan` allows private/loopback/link-local addresses.
//! 4. `allow_all_public` allows everything else.
//! 5. Otherwise, deny.

use crate::config::{AccessConfig, BlacklistEntry};
use arc_swap::ArcSwap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct AccessControl {
    config: ArcSwap<AccessConfig>,
}

impl AccessControl {
    pub fn new(config: AccessConfig) -> Self {
        Self { config: ArcSwap::from_pointee(config) }
    }

    /// Atomically swap in a freshly-validated config snapshot (component K's
    /// reconfiguration path never blocks in-flight decisions).
    pub fn update(&self, config: AccessConfig) {
        self.config.store(Arc::new(config));
    }

    /// Control-API `blacklist_add` (spec §6): inserts or replaces the entry
    /// for `ip` and invalidates the copy-on-write snapshot so the next
    /// `is_allowed` call sees it immediately.
    pub fn blacklist_add(&self, ip: IpAddr, reason: String, duration_sec: u64) {
        let now = now_unix();
        let expires_at = if duration_sec == 0 { 0 } else { now + duration_sec };
        let mut cfg = (**self.config.load()).clone();
        cfg.blacklist.retain(|b| b.ip != ip);
        cfg.blacklist.push(BlacklistEntry { ip, reason, expires_at, created_at: now });
        self.update(cfg);
    }

    pub fn blacklist_remove(&self, ip: IpAddr) {
        let mut cfg = (**self.config.load()).clone();
        cfg.blacklist.retain(|b| b.ip != ip);
        self.update(cfg);
    }

    pub fn blacklist_list(&self) -> Vec<BlacklistEntry> {
        self.config.load().blacklist.clone()
    }

    /// Control-API `blacklist_cache_refresh`: forces an immediate sweep of
    /// expired entries, rebuilding the snapshot even if nothing external
    /// changed. The periodic task in [`Self::spawn_expiry_sweep`] does the
    /// same thing on a bounded cadence; this is the on-demand path.
    pub fn blacklist_cache_refresh(&self) {
        let now = now_unix();
        let mut cfg = (**self.config.load()).clone();
        let before = cfg.blacklist.len();
        cfg.blacklist.retain(|b| b.is_active(now));
        if cfg.blacklist.len() != before {
            self.update(cfg);
        }
    }

    /// Background eviction of expired blacklist entries at a bounded
    /// cadence (spec §4.F "a background sweep evicts expired entries").
    pub fn spawn_expiry_sweep(self: &Arc<Self>, interval: Duration) {
        let access = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                access.blacklist_cache_refresh();
            }
        });
    }

    pub fn is_allowed(&self, ip: IpAddr, protocol: Protocol) -> Decision {
        let cfg = self.config.load();

        let protocol_enabled = match protocol {
            Protocol::Http => cfg.http_enabled,
            Protocol::Ws => cfg.ws_enabled,
            Protocol::Stream => cfg.stream_enabled,
        };
        if !protocol_enabled {
            return Decision::Deny("protocol disabled");
        }

        let now = now_unix();
        if cfg.blacklist.iter().any(|b| b.ip == ip && b.is_active(now)) {
            return Decision::Deny("blacklisted");
        }

        if cfg.whitelist.iter().any(|net| net.contains(&ip)) {
            return Decision::Allow;
        }

        if cfg.allow_all_lan && is_lan(ip) {
            return Decision::Allow;
        }

        if cfg.allow_all_public && !is_lan(ip) {
            return Decision::Allow;
        }

        Decision::Deny("no matching allow rule")
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// RFC 1918 private ranges, loopback, and link-local — mirrors the "LAN"
/// classification nginx/haproxy style reverse proxies use for trust
/// decisions, extended to IPv6 unique-local and link-local.
pub fn is_lan(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || is_unique_local_v6(v6) || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_unique_local_v6(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Ws,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlacklistEntry;

    fn base_config() -> AccessConfig {
        AccessConfig {
            http_enabled: true,
            ws_enabled: true,
            stream_enabled: true,
            allow_all_lan: false,
            allow_all_public: false,
            whitelist: vec![],
            blacklist: vec![],
        }
    }

    #[test]
    fn denies_by_default() {
        let ac = AccessControl::new(base_config());
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(!ac.is_allowed(ip, Protocol::Http).is_allowed());
    }

    #[test]
    fn whitelist_allows_specific_cidr() {
        let mut cfg = base_config();
        cfg.whitelist = vec!["8.8.8.0/24".parse().unwrap()];
        let ac = AccessControl::new(cfg);
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(ac.is_allowed(ip, Protocol::Http).is_allowed());
    }

    #[test]
    fn allow_all_lan_covers_private_ranges() {
        let mut cfg = base_config();
        cfg.allow_all_lan = true;
        let ac = AccessControl::new(cfg);
        assert!(ac.is_allowed("192.168.1.5".parse().unwrap(), Protocol::Http).is_allowed());
        assert!(ac.is_allowed("127.0.0.1".parse().unwrap(), Protocol::Http).is_allowed());
        assert!(!ac.is_allowed("8.8.8.8".parse().unwrap(), Protocol::Http).is_allowed());
    }

    #[test]
    fn blacklist_overrides_whitelist() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let mut cfg = base_config();
        cfg.whitelist = vec!["1.2.3.0/24".parse().unwrap()];
        cfg.blacklist = vec![BlacklistEntry { ip, reason: "abuse".into(), expires_at: 0, created_at: 0 }];
        let ac = AccessControl::new(cfg);
        assert!(!ac.is_allowed(ip, Protocol::Http).is_allowed());
    }

    #[test]
    fn expired_blacklist_entry_no_longer_denies() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let mut cfg = base_config();
        cfg.allow_all_public = true;
        cfg.blacklist = vec![BlacklistEntry { ip, reason: "abuse".into(), expires_at: 1, created_at: 0 }];
        let ac = AccessControl::new(cfg);
        assert!(ac.is_allowed(ip, Protocol::Http).is_allowed());
    }

    #[test]
    fn disabled_protocol_always_denies() {
        let mut cfg = base_config();
        cfg.allow_all_public = true;
        cfg.ws_enabled = false;
        let ac = AccessControl::new(cfg);
        assert!(!ac.is_allowed("8.8.8.8".parse().unwrap(), Protocol::Ws).is_allowed());
        assert!(ac.is_allowed("8.8.8.8".parse().unwrap(), Protocol::Http).is_allowed());
    }

    #[test]
    fn blacklist_add_takes_effect_immediately() {
        let mut cfg = base_config();
        cfg.allow_all_public = true;
        let ac = AccessControl::new(cfg);
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        assert!(ac.is_allowed(ip, Protocol::Http).is_allowed());
        ac.blacklist_add(ip, "abuse".to_string(), 60);
        assert!(!ac.is_allowed(ip, Protocol::Http).is_allowed());
        assert_eq!(ac.blacklist_list().len(), 1);
    }

    #[test]
    fn blacklist_remove_clears_entry() {
        let mut cfg = base_config();
        cfg.allow_all_public = true;
        let ac = AccessControl::new(cfg);
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        ac.blacklist_add(ip, "abuse".to_string(), 0);
        ac.blacklist_remove(ip);
        assert!(ac.is_allowed(ip, Protocol::Http).is_allowed());
        assert!(ac.blacklist_list().is_empty());
    }

    #[test]
    fn cache_refresh_evicts_expired_entries() {
        let mut cfg = base_config();
        cfg.allow_all_public = true;
        cfg.blacklist =
            vec![BlacklistEntry { ip: "1.2.3.4".parse().unwrap(), reason: String::new(), expires_at: 1, created_at: 0 }];
        let ac = AccessControl::new(cfg);
        ac.blacklist_cache_refresh();
        assert!(ac.blacklist_list().is_empty());
    }
}
