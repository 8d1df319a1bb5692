//! Batched persistence to the external log/metrics sink (spec §4.L, §7
//! "Observer sink errors never propagate to request handlers").
//!
//! The sink itself — the persistent store for request logs and
//! time-series metrics — is an external collaborator (spec §1 scope) that
//! this crate only ever talks to through [`LogSink`]. When it's slow or
//! down, records queue in a bounded, size-capped buffer; once full, the
//! oldest queued record is dropped and [`SinkQueue::dropped_count`]
//! increments, the same drop-oldest-under-pressure idiom used by the rate
//! limiter's ban map and the stream engine's UDP session table.

use super::record::ObservedRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Append-only write API the external persistent store exposes. A real
/// deployment backs this with the desktop app's SQLite/embedded store;
/// tests and headless embedding can use [`NullSink`] or a channel-backed
/// stub.
pub trait LogSink: Send + Sync {
    fn write_batch(&self, records: &[ObservedRecord]);
}

/// Discards everything. Used when no sink is configured (e.g. headless
/// embedding with logging disabled) and in unit tests that only care
/// about in-memory metrics.
pub struct NullSink;

impl LogSink for NullSink {
    fn write_batch(&self, _records: &[ObservedRecord]) {}
}

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_BATCH_SIZE: usize = 256;

/// Bounded, drop-oldest queue sitting in front of a [`LogSink`].
pub struct SinkQueue {
    buffer: Mutex<VecDeque<ObservedRecord>>,
    capacity: usize,
    batch_size: usize,
    dropped: AtomicU64,
}

impl SinkQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_BATCH_SIZE)
    }

    pub fn with_capacity(capacity: usize, batch_size: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            batch_size,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues `record`. If the queue is at capacity, drops the oldest
    /// queued record (not the new one) and increments the drop counter —
    /// recent observations are more actionable than stale ones.
    pub fn push(&self, record: ObservedRecord) {
        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(record);
    }

    /// Drains up to `batch_size` records for a flush cycle.
    pub fn drain_batch(&self) -> Vec<ObservedRecord> {
        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let n = self.batch_size.min(buf.len());
        buf.drain(..n).collect()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Clones the currently-queued (not-yet-flushed) records without
    /// draining them, for control-API log queries that run between flush
    /// ticks. Anything already handed to the sink is out of this crate's
    /// read path (spec §1 scope: the sink is an external collaborator).
    pub fn snapshot(&self) -> Vec<ObservedRecord> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    /// Discards every currently-queued record without flushing them.
    pub fn clear(&self) {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SinkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn record(n: u64) -> ObservedRecord {
        ObservedRecord {
            timestamp_unix_secs: n,
            listener: "l".to_string(),
            client_ip: "1.1.1.1".parse::<IpAddr>().unwrap(),
            peer_ip: "1.1.1.1".parse::<IpAddr>().unwrap(),
            method: "GET".to_string(),
            host: "h".to_string(),
            path: "/".to_string(),
            status: 200,
            upstream: None,
            route_id: None,
            latency_ms: 1.0,
            bytes_in: 0,
            bytes_out: 0,
            user_agent: None,
            referer: None,
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let q = SinkQueue::with_capacity(2, 10);
        q.push(record(1));
        q.push(record(2));
        q.push(record(3));
        assert_eq!(q.dropped_count(), 1);
        let batch = q.drain_batch();
        assert_eq!(batch.iter().map(|r| r.timestamp_unix_secs).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn drain_batch_respects_batch_size() {
        let q = SinkQueue::with_capacity(100, 3);
        for i in 0..10 {
            q.push(record(i));
        }
        assert_eq!(q.drain_batch().len(), 3);
        assert_eq!(q.len(), 7);
    }
}
