//! Passive failure tracking shared by the HTTP/WS and stream selectors
//! (spec §4.D). A member is marked down after consecutive failures exceed
//! a threshold and held down for a cooldown window, but the tracker never
//! reports every candidate as down — the caller always has at least one
//! member to try, matching spec §9's "passive failure" design note.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_THRESHOLD: u32 = 1;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

struct MemberState {
    consecutive_failures: AtomicU32,
    down_until_unix: AtomicU64,
}

pub struct FailureTracker {
    members: Vec<MemberState>,
    threshold: u32,
    cooldown: Duration,
}

impl FailureTracker {
    pub fn new(count: usize) -> Self {
        Self::with_policy(count, DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
    }

    pub fn with_policy(count: usize, threshold: u32, cooldown: Duration) -> Self {
        let members = (0..count)
            .map(|_| MemberState { consecutive_failures: AtomicU32::new(0), down_until_unix: AtomicU64::new(0) })
            .collect();
        Self { members, threshold, cooldown }
    }

    pub fn record_success(&self, idx: usize) {
        if let Some(m) = self.members.get(idx) {
            m.consecutive_failures.store(0, Ordering::Relaxed);
            m.down_until_unix.store(0, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, idx: usize) {
        let Some(m) = self.members.get(idx) else { return };
        let failures = m.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            m.down_until_unix.store(now_unix() + self.cooldown.as_secs(), Ordering::Relaxed);
        }
    }

    fn is_down(&self, idx: usize) -> bool {
        self.members
            .get(idx)
            .map(|m| now_unix() < m.down_until_unix.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Filters `candidates` down to members currently up. If that would
    /// leave nothing, falls back to the full candidate list so a route
    /// never refuses to forward purely because every member is cooling
    /// down.
    pub fn up_indices(&self, candidates: &[usize]) -> Vec<usize> {
        let up: Vec<usize> = candidates.iter().copied().filter(|&i| !self.is_down(i)).collect();
        if up.is_empty() {
            candidates.to_vec()
        } else {
            up
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_down_after_threshold_failures() {
        let t = FailureTracker::with_policy(2, 3, Duration::from_secs(30));
        for _ in 0..3 {
            t.record_failure(0);
        }
        assert!(t.is_down(0));
        assert!(!t.is_down(1));
    }

    #[test]
    fn success_resets_failure_count() {
        let t = FailureTracker::with_policy(1, 3, Duration::from_secs(30));
        t.record_failure(0);
        t.record_failure(0);
        t.record_success(0);
        t.record_failure(0);
        assert!(!t.is_down(0));
    }

    #[test]
    fn never_reports_all_members_down() {
        let t = FailureTracker::with_policy(2, 1, Duration::from_secs(30));
        t.record_failure(0);
        t.record_failure(1);
        let up = t.up_indices(&[0, 1]);
        assert_eq!(up, vec![0, 1]);
    }

    #[test]
    fn excludes_only_down_members_when_some_remain_up() {
        let t = FailureTracker::with_policy(2, 1, Duration::from_secs(30));
        t.record_failure(0);
        let up = t.up_indices(&[0, 1]);
        assert_eq!(up, vec![1]);
    }
}
