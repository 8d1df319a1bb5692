//! Per-rule rate limiter lookup plus the ban-window map that the teacher's
//! [`super::RateLimiter`] algorithm leaves to its caller.

use super::{RateLimitResult, RateLimiter};
use crate::config::{HttpRule, RateLimitRule, WsRule};
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Holds one [`RateLimiter`] per HTTP/WS rule that declares a `rate_limit`,
/// and a shared ban map keyed by client IP. A client that gets `Limited` on
/// a rule with `ban_seconds > 0` is refused outright for the ban window,
/// without re-consulting the sketch, until the ban expires.
pub struct RateLimitManager {
    limiters: DashMap<String, RateLimiter>,
    bans: DashMap<IpAddr, Instant>,
}

impl RateLimitManager {
    pub fn new(rules: &[HttpRule]) -> Self {
        Self::from_rule_limits(rules.iter().map(|r| (r.id.as_str(), r.rate_limit)))
    }

    /// Builds one manager's limiter table from every rule across a whole
    /// config snapshot — HTTP and WS rule ids are unique within the same
    /// namespace (spec invariant 1), so a single manager can serve every
    /// listener built from that snapshot.
    pub fn from_config(http_rules: &[HttpRule], ws_rules: &[WsRule]) -> Self {
        Self::from_rule_limits(
            http_rules
                .iter()
                .map(|r| (r.id.as_str(), r.rate_limit))
                .chain(ws_rules.iter().map(|r| (r.id.as_str(), r.rate_limit))),
        )
    }

    fn from_rule_limits<'a>(entries: impl Iterator<Item = (&'a str, Option<RateLimitRule>)>) -> Self {
        let limiters = DashMap::new();
        for (id, rate_limit) in entries {
            if let Some(rl) = rate_limit {
                let window = Duration::from_secs(1);
                limiters.insert(id.to_string(), RateLimiter::new(rl.rps, rl.burst, window));
            }
        }
        Self { limiters, bans: DashMap::new() }
    }

    /// Check (and record) a request against the rule's limiter. Rules with
    /// no configured `rate_limit` always return `Allowed`.
    pub fn check(&self, rule_id: &str, ip: IpAddr, ban_seconds: u64) -> RateLimitResult {
        if let Some(until) = self.bans.get(&ip) {
            if Instant::now() < *until {
                return RateLimitResult::Limited {
                    limit: 0,
                    remaining: 0,
                    reset_after: until.saturating_duration_since(Instant::now()),
                };
            }
            drop(until);
            self.bans.remove(&ip);
        }

        let Some(limiter) = self.limiters.get(rule_id) else {
            return RateLimitResult::Allowed { remaining: isize::MAX, limit: isize::MAX };
        };

        let result = limiter.check(&ip);
        if result.is_limited() && ban_seconds > 0 {
            self.bans.insert(ip, Instant::now() + Duration::from_secs(ban_seconds));
        }
        result
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.bans.get(ip).map(|until| Instant::now() < *until).unwrap_or(false)
    }

    /// Drop expired ban entries. Intended to run on a periodic sweep
    /// alongside the blacklist sweep in `security::access`.
    pub fn sweep_expired_bans(&self) {
        let now = Instant::now();
        self.bans.retain(|_, until| now < *until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitRule;
    use std::collections::BTreeSet;

    fn rule_with_limit(id: &str, rps: u32, burst: u32, ban_seconds: u64) -> HttpRule {
        HttpRule {
            id: id.to_string(),
            enabled: true,
            listen_addrs: BTreeSet::new(),
            tls: None,
            basic_auth: None,
            rate_limit: Some(RateLimitRule { rps, burst, ban_seconds }),
            routes: vec![],
        }
    }

    #[test]
    fn allows_within_burst_then_limits() {
        let rules = vec![rule_with_limit("r1", 1, 2, 0)];
        let mgr = RateLimitManager::new(&rules);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(mgr.check("r1", ip, 0).is_allowed());
        assert!(mgr.check("r1", ip, 0).is_allowed());
        assert!(mgr.check("r1", ip, 0).is_limited());
    }

    #[test]
    fn bans_after_limited_when_ban_seconds_set() {
        let rules = vec![rule_with_limit("r1", 1, 1, 60)];
        let mgr = RateLimitManager::new(&rules);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(mgr.check("r1", ip, 60).is_allowed());
        assert!(mgr.check("r1", ip, 60).is_limited());
        assert!(mgr.is_banned(&ip));
        // Still banned on next check, independent of the sketch state.
        assert!(mgr.check("r1", ip, 60).is_limited());
    }

    #[test]
    fn unconfigured_rule_always_allows() {
        let rules = vec![HttpRule {
            id: "r2".to_string(),
            enabled: true,
            listen_addrs: BTreeSet::new(),
            tls: None,
            basic_auth: None,
            rate_limit: None,
            routes: vec![],
        }];
        let mgr = RateLimitManager::new(&rules);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        for _ in 0..100 {
            assert!(mgr.check("r2", ip, 0).is_allowed());
        }
    }
}
