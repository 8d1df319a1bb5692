//! Per-route upstream selection state (spec §4.D for HTTP/WS): a weighted
//! round-robin cursor plus a passive-failure tracker, rebuilt whenever a
//! route's upstream list changes. Kept separate from [`crate::config::HttpRoute`]
//! because it carries runtime state (cursor position, failure counters)
//! the immutable config snapshot must never hold.

use crate::config::WeightedUpstream;
use crate::selector::{FailureTracker, WeightedRoundRobin};

pub struct RouteSelector {
    upstreams: Vec<WeightedUpstream>,
    rr: WeightedRoundRobin,
    failures: FailureTracker,
}

impl RouteSelector {
    pub fn new(upstreams: Vec<WeightedUpstream>) -> Self {
        let weights: Vec<u32> = upstreams.iter().map(|u| u.weight).collect();
        let rr = WeightedRoundRobin::new(&weights);
        let failures = FailureTracker::new(upstreams.len());
        Self { upstreams, rr, failures }
    }

    pub fn upstream(&self, idx: usize) -> Option<&WeightedUpstream> {
        self.upstreams.get(idx)
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Picks the next candidate, skipping members currently passively
    /// marked down. Bounded to `len()` cursor advances so a fully-down
    /// pool still resolves to some candidate (spec §4.D "exclusion is
    /// bounded so at least one candidate always remains").
    pub fn pick(&self) -> Option<usize> {
        if self.upstreams.is_empty() {
            return None;
        }
        let all: Vec<usize> = (0..self.upstreams.len()).collect();
        let up = self.failures.up_indices(&all);
        for _ in 0..all.len() {
            match self.rr.next() {
                Some(idx) if up.contains(&idx) => return Some(idx),
                Some(_) => continue,
                None => return None,
            }
        }
        up.first().copied()
    }

    pub fn record_success(&self, idx: usize) {
        self.failures.record_success(idx);
    }

    pub fn record_failure(&self, idx: usize) {
        self.failures.record_failure(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;

    fn upstream(url: &str, weight: u32) -> WeightedUpstream {
        WeightedUpstream { url: url.parse::<Uri>().unwrap(), weight }
    }

    #[test]
    fn skips_candidates_marked_down() {
        let sel = RouteSelector::new(vec![upstream("http://a", 1), upstream("http://b", 1)]);
        sel.record_failure(0);
        sel.record_failure(0);
        sel.record_failure(0);
        for _ in 0..4 {
            assert_eq!(sel.pick(), Some(1));
        }
    }

    #[test]
    fn empty_selector_returns_none() {
        let sel = RouteSelector::new(vec![]);
        assert_eq!(sel.pick(), None);
    }
}
