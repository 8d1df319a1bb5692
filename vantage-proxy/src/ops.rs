//! Ambient operational HTTP endpoints: liveness/readiness probes and a
//! Prometheus scrape target. Kept in the binary rather than the library
//! since these are this process's ops surface, not part of the
//! proxying core the library exposes for embedding.

use http::{Response, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vantage_proxy_lib::Supervisor;

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder().status(status).header("content-type", "text/plain").body(Full::new(Bytes::from(body))).unwrap()
}

async fn handle(
    req: Request<Incoming>,
    supervisor: Arc<Supervisor>,
    registry: Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(match req.uri().path() {
        "/live" => text(StatusCode::OK, "ok"),
        "/ready" => {
            if supervisor.is_running() {
                text(StatusCode::OK, "ready")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
            }
        }
        "/health" => {
            let down = supervisor.status().iter().filter(|s| !s.up).count();
            if down == 0 {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::OK, "degraded")
            }
        }
        "/metrics" => {
            let metric_families = registry.gather();
            let mut buf = Vec::new();
            let encoder = TextEncoder::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buf) {
                warn!(error = %e, "failed to encode prometheus metrics");
                return Ok(text(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
            }
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", encoder.format_type())
                .body(Full::new(Bytes::from(buf)))
                .unwrap()
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    })
}

/// Binds `addr` and serves `/health`, `/ready`, `/live`, and `/metrics`
/// until `cancel` fires. Runs until the supervisor itself is stopped.
pub async fn serve(addr: SocketAddr, supervisor: Arc<Supervisor>, registry: Registry, cancel: CancellationToken) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(%addr, error = %e, "failed to bind ops endpoint listener, disabling it");
            return;
        }
    };

    let builder = ConnBuilder::new(TokioExecutor::new());
    tracing::info!(%addr, "ops endpoints listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "ops endpoint accept error");
                        continue;
                    }
                };
                let supervisor = Arc::clone(&supervisor);
                let registry = registry.clone();
                let builder = builder.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(req, Arc::clone(&supervisor), registry.clone()));
                    if let Err(e) = builder.serve_connection(io, service).await {
                        warn!(error = %e, "ops endpoint connection error");
                    }
                });
            }
        }
    }
}
