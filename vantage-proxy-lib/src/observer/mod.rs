//! The Observer (spec §4.L): structured log emission, rolling in-memory
//! metrics, and batched persistence to an external sink.
//!
//! Grounded on the teacher's `telemetry/metrics.rs` for the
//! OpenTelemetry-over-Prometheus counter/histogram registration pattern;
//! the per-listener rolling time series and the batched drop-oldest sink
//! queue are new structures this design needs that the teacher's
//! single-backend metrics module never had to build.

pub mod metrics;
pub mod record;
pub mod sink;

pub use metrics::ListenerMetrics;
pub use record::ObservedRecord;
pub use sink::{LogSink, NullSink, SinkQueue};

use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Prometheus-facing counters and histograms, registered once at startup.
/// Mirrors the teacher's `Metrics` struct shape, renamed to this crate's
/// domain (connections/requests per listener, upstream outcome, dropped
/// sink records) instead of the teacher's fingerprinting counters.
#[derive(Clone)]
pub struct PromMetrics {
    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,
    pub upstream_requests_total: Counter<u64>,
    pub upstream_errors_total: Counter<u64>,
    pub sink_dropped_total: Counter<u64>,
    pub active_connections: UpDownCounter<i64>,
}

impl PromMetrics {
    fn new(meter: Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("vantage_requests_total")
                .with_description("Total number of requests processed by the core")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("vantage_requests_duration_seconds")
                .with_description("Request duration in seconds, client-facing")
                .build(),
            upstream_requests_total: meter
                .u64_counter("vantage_upstream_requests_total")
                .with_description("Total number of requests forwarded to an upstream")
                .build(),
            upstream_errors_total: meter
                .u64_counter("vantage_upstream_errors_total")
                .with_description("Total number of upstream connect/forward failures")
                .build(),
            sink_dropped_total: meter
                .u64_counter("vantage_sink_dropped_total")
                .with_description("Total number of observation records dropped because the sink queue was full")
                .build(),
            active_connections: meter
                .i64_up_down_counter("vantage_active_connections")
                .with_description("Number of currently active connections across all listeners")
                .build(),
        }
    }
}

/// Builds a Prometheus-backed meter provider and registers [`PromMetrics`]
/// against it, mirroring `telemetry::metrics::init_metrics` in the
/// teacher. Returns the metrics handle and the registry a `/metrics`
/// endpoint can scrape.
pub fn init_prom_metrics(
) -> Result<(PromMetrics, prometheus::Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = prometheus::Registry::default();
    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(provider);
    let meter = opentelemetry::global::meter("vantage-proxy");
    Ok((PromMetrics::new(meter), registry))
}

/// Central observation point every terminal request/connection event
/// reports to (spec §4.H-J call sites). Holds one [`ListenerMetrics`] per
/// listener, a batched sink queue, and (optionally) the Prometheus
/// counters.
pub struct Observer {
    per_listener: DashMap<String, Mutex<ListenerMetrics>>,
    queue: Arc<SinkQueue>,
    prom: Option<PromMetrics>,
    show_realtime_logs: AtomicBool,
    last_reported_dropped: std::sync::atomic::AtomicU64,
}

impl Observer {
    pub fn new() -> Self {
        Self {
            per_listener: DashMap::new(),
            queue: Arc::new(SinkQueue::new()),
            prom: None,
            show_realtime_logs: AtomicBool::new(false),
            last_reported_dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_prom_metrics(mut self, prom: PromMetrics) -> Self {
        self.prom = Some(prom);
        self
    }

    pub fn set_show_realtime_logs(&self, on: bool) {
        self.show_realtime_logs.store(on, Ordering::Relaxed);
    }

    /// Adjusts the `active_connections` gauge. Called by each engine's
    /// accept loop on connection open (`delta = 1`) and its guard's `Drop`
    /// on close (`delta = -1`); a no-op when Prometheus metrics aren't
    /// configured.
    pub fn note_connection_delta(&self, delta: i64) {
        if let Some(prom) = &self.prom {
            prom.active_connections.add(delta, &[]);
        }
    }

    /// Records one terminal event: updates the listener's rolling series,
    /// enqueues the record for batched persistence, emits a structured
    /// `tracing` line (gated by `show_realtime_logs`, mirroring the
    /// `log-line` event channel entry in spec §6), and bumps Prometheus
    /// counters if configured.
    pub fn observe(&self, record: ObservedRecord) {
        {
            let entry = self.per_listener.entry(record.listener.clone()).or_default();
            entry.lock().unwrap_or_else(|e| e.into_inner()).record(&record);
        }

        if let Some(prom) = &self.prom {
            prom.requests_total.add(1, &[]);
            prom.requests_duration_seconds.record(record.latency_ms / 1000.0, &[]);
            if let Some(upstream) = &record.upstream {
                prom.upstream_requests_total.add(1, &[]);
                if matches!(record.status_class(), record::StatusClass::ServerError | record::StatusClass::Err) {
                    prom.upstream_errors_total.add(1, &[]);
                }
                let _ = upstream;
            }
        }

        if self.show_realtime_logs.load(Ordering::Relaxed) {
            info!(
                listener = %record.listener,
                method = %record.method,
                path = %record.path,
                status = record.status,
                latency_ms = record.latency_ms,
                upstream = ?record.upstream,
                "request"
            );
        }

        self.queue.push(record);

        if let Some(prom) = &self.prom {
            let total_dropped = self.queue.dropped_count();
            let last = self.last_reported_dropped.swap(total_dropped, Ordering::Relaxed);
            if total_dropped > last {
                prom.sink_dropped_total.add(total_dropped - last, &[]);
            }
        }
    }

    pub fn listener_metrics_snapshot(&self, listener: &str) -> Option<(Vec<metrics::Bucket>, Vec<metrics::Bucket>)> {
        self.per_listener.get(listener).map(|m| {
            let m = m.lock().unwrap_or_else(|e| e.into_inner());
            (m.seconds_snapshot(), m.minutes_snapshot())
        })
    }

    pub fn dropped_sink_records(&self) -> u64 {
        self.queue.dropped_count()
    }

    /// Control-API `get_logs`/`query_request_logs`: a snapshot of records
    /// still sitting in the flush queue. Already-flushed history lives in
    /// the external sink, which this crate has no read path for.
    pub fn queued_records(&self) -> Vec<ObservedRecord> {
        self.queue.snapshot()
    }

    /// Control-API `clear_logs`.
    pub fn clear_queued_records(&self) {
        self.queue.clear();
    }

    /// Control-API `get_metrics`: every listener's current rolling
    /// time-series snapshot.
    pub fn all_listener_metrics(&self) -> Vec<(String, Vec<metrics::Bucket>, Vec<metrics::Bucket>)> {
        self.per_listener
            .iter()
            .map(|e| {
                let m = e.value().lock().unwrap_or_else(|p| p.into_inner());
                (e.key().clone(), m.seconds_snapshot(), m.minutes_snapshot())
            })
            .collect()
    }

    /// Spawns the periodic batched-flush task (spec §4.L "Flushes to the
    /// external sink in batches"). Sink write errors never propagate —
    /// they're logged and the next flush tick tries again, matching §7's
    /// "Observer sink errors never propagate to request handlers".
    pub fn spawn_flush_task(self: &Arc<Self>, sink: Arc<dyn LogSink>, interval: Duration) {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let batch = observer.queue.drain_batch();
                if batch.is_empty() {
                    continue;
                }
                let n = batch.len();
                sink.write_batch(&batch);
                tracing::debug!(count = n, "flushed observation batch to sink");
                let dropped = observer.queue.dropped_count();
                if dropped > 0 {
                    warn!(dropped, "observer sink queue has dropped records under sustained pressure");
                }
            }
        });
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn record(listener: &str, status: u16) -> ObservedRecord {
        ObservedRecord {
            timestamp_unix_secs: record::now_unix_secs(),
            listener: listener.to_string(),
            client_ip: "1.2.3.4".parse::<IpAddr>().unwrap(),
            peer_ip: "1.2.3.4".parse::<IpAddr>().unwrap(),
            method: "GET".to_string(),
            host: "h".to_string(),
            path: "/".to_string(),
            status,
            upstream: Some("u1".to_string()),
            route_id: Some("r1".to_string()),
            latency_ms: 12.0,
            bytes_in: 10,
            bytes_out: 20,
            user_agent: None,
            referer: None,
        }
    }

    #[test]
    fn observe_updates_per_listener_series_and_queue() {
        let observer = Observer::new();
        observer.observe(record("l1", 200));
        observer.observe(record("l1", 500));
        let (secs, _mins) = observer.listener_metrics_snapshot("l1").unwrap();
        assert_eq!(secs.iter().map(|b| b.counts.total()).sum::<u64>(), 2);
        assert!(observer.listener_metrics_snapshot("missing").is_none());
    }

    #[test]
    fn drain_via_sink_queue_clears_backlog() {
        let observer = Observer::new();
        for _ in 0..5 {
            observer.observe(record("l1", 200));
        }
        assert_eq!(observer.queue.drain_batch().len(), 5);
    }
}
