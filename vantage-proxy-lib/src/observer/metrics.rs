//! Rolling in-memory time-series tables (spec §4.L): one second-granularity
//! table bounded to a short window, one minute-granularity table bounded to
//! a longer window, both keyed by listener. Each bucket tracks status-class
//! counts, average/max latency, and a fixed-size reservoir for percentile
//! estimation — the same bounded-structure idiom the rate limiter and
//! access-control caches use elsewhere in this crate (size-bounded,
//! eviction rather than unbounded growth).

use super::record::{ObservedRecord, StatusClass};
use std::collections::{HashMap, VecDeque};

const SECOND_WINDOW: usize = 300; // 5 minutes of 1s buckets
const MINUTE_WINDOW: usize = 1_440; // 24 hours of 1m buckets
const RESERVOIR_CAP: usize = 512;
const TOP_K: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub informational: u64,
    pub success: u64,
    pub redirect: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub err: u64,
}

impl StatusCounts {
    fn record(&mut self, class: StatusClass) {
        match class {
            StatusClass::Informational => self.informational += 1,
            StatusClass::Success => self.success += 1,
            StatusClass::Redirect => self.redirect += 1,
            StatusClass::ClientError => self.client_error += 1,
            StatusClass::ServerError => self.server_error += 1,
            StatusClass::Err => self.err += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.informational + self.success + self.redirect + self.client_error + self.server_error + self.err
    }
}

/// Reservoir-sampled latencies for one bucket, used to estimate p95/p99
/// without retaining every observation.
#[derive(Debug, Clone, Default)]
struct Reservoir {
    samples: Vec<f64>,
    seen: u64,
}

impl Reservoir {
    fn push(&mut self, value: f64, rng_state: &mut u64) {
        self.seen += 1;
        if self.samples.len() < RESERVOIR_CAP {
            self.samples.push(value);
            return;
        }
        let j = next_rand(rng_state) % self.seen;
        if (j as usize) < RESERVOIR_CAP {
            self.samples[j as usize] = value;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// xorshift64: deterministic, dependency-free, good enough for reservoir
/// index selection (not used for anything security-sensitive).
fn next_rand(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub key: u64,
    pub counts: StatusCounts,
    pub latency_sum_ms: f64,
    pub latency_max_ms: f64,
    reservoir: Reservoir,
    rng_state: u64,
}

impl Bucket {
    fn new(key: u64) -> Self {
        Self {
            key,
            counts: StatusCounts::default(),
            latency_sum_ms: 0.0,
            latency_max_ms: 0.0,
            reservoir: Reservoir::default(),
            rng_state: key.wrapping_mul(0x9E3779B97F4A7C15).max(1),
        }
    }

    fn record(&mut self, rec: &ObservedRecord) {
        self.counts.record(rec.status_class());
        self.latency_sum_ms += rec.latency_ms;
        self.latency_max_ms = self.latency_max_ms.max(rec.latency_ms);
        self.reservoir.push(rec.latency_ms, &mut self.rng_state);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let n = self.counts.total();
        if n == 0 {
            0.0
        } else {
            self.latency_sum_ms / n as f64
        }
    }

    pub fn p95_latency_ms(&self) -> f64 {
        self.reservoir.percentile(0.95)
    }

    pub fn p99_latency_ms(&self) -> f64 {
        self.reservoir.percentile(0.99)
    }
}

/// A fixed-capacity ring of buckets at a single granularity.
struct Series {
    granularity_secs: u64,
    window: usize,
    buckets: VecDeque<Bucket>,
}

impl Series {
    fn new(granularity_secs: u64, window: usize) -> Self {
        Self { granularity_secs, window, buckets: VecDeque::with_capacity(window) }
    }

    fn record(&mut self, rec: &ObservedRecord) {
        let key = rec.timestamp_unix_secs / self.granularity_secs;
        if self.buckets.back().map(|b| b.key) != Some(key) {
            self.buckets.push_back(Bucket::new(key));
            while self.buckets.len() > self.window {
                self.buckets.pop_front();
            }
        }
        if let Some(b) = self.buckets.back_mut() {
            b.record(rec);
        }
    }

    fn snapshot(&self) -> Vec<Bucket> {
        self.buckets.iter().cloned().collect()
    }
}

/// Counts occurrences of a key (route id or upstream), retaining only the
/// top-K by count so the table never grows unbounded under a diverse or
/// adversarial workload.
#[derive(Default)]
struct TopKCounter {
    counts: HashMap<String, u64>,
}

impl TopKCounter {
    fn record(&mut self, key: &str) {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
        if self.counts.len() > TOP_K * 4 {
            self.trim();
        }
    }

    fn trim(&mut self) {
        let mut entries: Vec<(String, u64)> = self.counts.drain().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(TOP_K);
        self.counts = entries.into_iter().collect();
    }

    fn top_k(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(TOP_K);
        entries
    }
}

/// Per-listener metrics: second- and minute-granularity time series plus
/// top-K error counters by route and upstream.
pub struct ListenerMetrics {
    seconds: Series,
    minutes: Series,
    route_errors: TopKCounter,
    upstream_errors: TopKCounter,
}

impl Default for ListenerMetrics {
    fn default() -> Self {
        Self {
            seconds: Series::new(1, SECOND_WINDOW),
            minutes: Series::new(60, MINUTE_WINDOW),
            route_errors: TopKCounter::default(),
            upstream_errors: TopKCounter::default(),
        }
    }
}

impl ListenerMetrics {
    pub fn record(&mut self, rec: &ObservedRecord) {
        self.seconds.record(rec);
        self.minutes.record(rec);
        if matches!(rec.status_class(), StatusClass::ServerError | StatusClass::Err) {
            if let Some(route) = &rec.route_id {
                self.route_errors.record(route);
            }
            if let Some(upstream) = &rec.upstream {
                self.upstream_errors.record(upstream);
            }
        }
    }

    pub fn seconds_snapshot(&self) -> Vec<Bucket> {
        self.seconds.snapshot()
    }

    pub fn minutes_snapshot(&self) -> Vec<Bucket> {
        self.minutes.snapshot()
    }

    pub fn top_route_errors(&self) -> Vec<(String, u64)> {
        self.route_errors.top_k()
    }

    pub fn top_upstream_errors(&self) -> Vec<(String, u64)> {
        self.upstream_errors.top_k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn record(ts: u64, status: u16, latency_ms: f64) -> ObservedRecord {
        ObservedRecord {
            timestamp_unix_secs: ts,
            listener: "l1".to_string(),
            client_ip: "1.2.3.4".parse::<IpAddr>().unwrap(),
            peer_ip: "1.2.3.4".parse::<IpAddr>().unwrap(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/".to_string(),
            status,
            upstream: Some("u1".to_string()),
            route_id: Some("r1".to_string()),
            latency_ms,
            bytes_in: 0,
            bytes_out: 0,
            user_agent: None,
            referer: None,
        }
    }

    #[test]
    fn buckets_by_second_and_counts_status_class() {
        let mut m = ListenerMetrics::default();
        m.record(&record(1000, 200, 5.0));
        m.record(&record(1000, 200, 15.0));
        m.record(&record(1001, 500, 10.0));
        let snap = m.seconds_snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].counts.success, 2);
        assert_eq!(snap[1].counts.server_error, 1);
    }

    #[test]
    fn window_is_bounded() {
        let mut m = ListenerMetrics::default();
        for t in 0..(SECOND_WINDOW as u64 + 50) {
            m.record(&record(t, 200, 1.0));
        }
        assert!(m.seconds_snapshot().len() <= SECOND_WINDOW);
    }

    #[test]
    fn top_k_error_counters_track_route_and_upstream() {
        let mut m = ListenerMetrics::default();
        for _ in 0..5 {
            m.record(&record(1, 500, 1.0));
        }
        assert_eq!(m.top_route_errors()[0], ("r1".to_string(), 5));
        assert_eq!(m.top_upstream_errors()[0], ("u1".to_string(), 5));
    }

    #[test]
    fn avg_and_max_latency_computed_per_bucket() {
        let mut m = ListenerMetrics::default();
        m.record(&record(5, 200, 10.0));
        m.record(&record(5, 200, 30.0));
        let snap = m.seconds_snapshot();
        assert_eq!(snap[0].avg_latency_ms(), 20.0);
        assert_eq!(snap[0].latency_max_ms, 30.0);
    }
}
