//! Upstream connection pool (spec §4.B).
//!
//! The teacher keeps one global `http11`/`http2` [`hyper_util`] client pair
//! (`proxy/client_pool.rs`). A single rule list here can fan out to many
//! distinct upstream origins, so the pool is generalized to a
//! [`DashMap`] keyed by origin (scheme + authority + ALPN), each entry
//! holding its own pooled client plus idle bookkeeping for the sweeper.

use bytes::Bytes;
use http::uri::Uri;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Requests are always fully buffered before forwarding (body
/// transformation and redirect retries both need the bytes in hand), so
/// the pooled client's request body type is `Full<Bytes>` rather than the
/// server-side streaming `Incoming` type the teacher's single-shot
/// `ClientPool` used.
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginKey {
    pub scheme: String,
    pub authority: String,
    pub http2: bool,
}

impl OriginKey {
    pub fn from_uri(uri: &Uri, http2: bool) -> Option<Self> {
        Some(Self {
            scheme: uri.scheme_str()?.to_string(),
            authority: uri.authority()?.to_string(),
            http2,
        })
    }
}

struct PooledOrigin {
    client: HttpClient,
    last_used_unix: AtomicI64,
}

/// Bounded, origin-keyed HTTP client pool with an idle-eviction sweeper.
///
/// `max_idle` and `idle_timeout` come from [`crate::config::Limits`]; the
/// sweeper is driven externally (e.g. from the supervisor's maintenance
/// loop) via [`UpstreamPool::sweep_idle`].
pub struct UpstreamPool {
    origins: DashMap<OriginKey, PooledOrigin>,
    connect_timeout: Duration,
    max_idle: usize,
    idle_timeout: Duration,
}

impl UpstreamPool {
    pub fn new(connect_timeout: Duration, max_idle: usize, idle_timeout: Duration) -> Self {
        Self { origins: DashMap::new(), connect_timeout, max_idle, idle_timeout }
    }

    /// Returns a cloned handle to the pooled client for `key`, creating one
    /// (and evicting the coldest entry if the pool is at capacity) if
    /// absent.
    pub fn client_for(&self, key: OriginKey) -> HttpClient {
        if let Some(entry) = self.origins.get(&key) {
            entry.last_used_unix.store(now_unix(), Ordering::Relaxed);
            return entry.client.clone();
        }

        if self.origins.len() >= self.max_idle {
            self.evict_coldest();
        }

        let client = self.build_client(key.http2);
        self.origins.insert(
            key,
            PooledOrigin { client: client.clone(), last_used_unix: AtomicI64::new(now_unix()) },
        );
        client
    }

    fn build_client(&self, http2: bool) -> HttpClient {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(self.connect_timeout));
        connector.enforce_http(false);
        let mut builder = Client::builder(TokioExecutor::new());
        if http2 {
            builder.http2_only(true);
        }
        builder.build(connector)
    }

    fn evict_coldest(&self) {
        let oldest = self
            .origins
            .iter()
            .min_by_key(|e| e.last_used_unix.load(Ordering::Relaxed))
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.origins.remove(&key);
        }
    }

    /// Drops entries untouched for longer than `idle_timeout`. Call from a
    /// periodic maintenance tick; never called from the request path.
    pub fn sweep_idle(&self) {
        let cutoff = now_unix() - self.idle_timeout.as_secs() as i64;
        self.origins.retain(|_, v| v.last_used_unix.load(Ordering::Relaxed) > cutoff);
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_key_from_uri_distinguishes_scheme_and_http2() {
        let uri: Uri = "http://example.com:8080/path".parse().unwrap();
        let k1 = OriginKey::from_uri(&uri, false).unwrap();
        let k2 = OriginKey::from_uri(&uri, true).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(k1.authority, "example.com:8080");
    }

    #[test]
    fn pool_reuses_client_for_same_origin() {
        let pool = UpstreamPool::new(Duration::from_secs(5), 8, Duration::from_secs(90));
        let key = OriginKey { scheme: "http".into(), authority: "a:80".into(), http2: false };
        let _c1 = pool.client_for(key.clone());
        assert_eq!(pool.len(), 1);
        let _c2 = pool.client_for(key);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_evicts_when_at_capacity() {
        let pool = UpstreamPool::new(Duration::from_secs(5), 1, Duration::from_secs(90));
        let k1 = OriginKey { scheme: "http".into(), authority: "a:80".into(), http2: false };
        let k2 = OriginKey { scheme: "http".into(), authority: "b:80".into(), http2: false };
        pool.client_for(k1);
        pool.client_for(k2);
        assert_eq!(pool.len(), 1);
    }
}
