#![forbid(unsafe_code)]

mod ops;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vantage_proxy_lib::config::load_from_str;
use vantage_proxy_lib::observer::init_prom_metrics;
use vantage_proxy_lib::{ConfigStore, FileConfigStore, NullSink, Observer, ProxyError, Supervisor};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vantage reverse proxy core")]
struct Cli {
    /// Path to the configuration TOML file.
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", env = "VANTAGE_CONFIG")]
    config: PathBuf,

    /// Address the ops endpoints (/health, /ready, /live, /metrics) listen on.
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:9901", env = "VANTAGE_OPS_ADDR")]
    ops_addr: SocketAddr,

    /// Disables the ops endpoint listener entirely.
    #[arg(long)]
    no_ops: bool,

    /// Emit one structured log line per completed request/connection, in
    /// addition to batched sink persistence.
    #[arg(long)]
    realtime_logs: bool,
}

const SINK_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let (prom, registry) = match init_prom_metrics() {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to initialize prometheus metrics");
            std::process::exit(3);
        }
    };

    let observer = Arc::new(Observer::new().with_prom_metrics(prom));
    observer.set_show_realtime_logs(cli.realtime_logs);
    observer.spawn_flush_task(Arc::new(NullSink), SINK_FLUSH_INTERVAL);

    let store = FileConfigStore::new(cli.config.clone());
    let raw = match store.get_config() {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to read configuration file");
            std::process::exit(2);
        }
    };
    let cfg = match load_from_str(&raw) {
        Ok(cfg) => cfg,
        Err(ProxyError::ConfigInvalid { path, message }) => {
            error!(%path, %message, "configuration invalid");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(2);
        }
    };

    info!(
        http_rules = cfg.http_rules.len(),
        ws_rules = cfg.ws_rules.len(),
        stream_servers = cfg.stream.servers.len(),
        "configuration loaded"
    );

    let (supervisor, mut events) = Supervisor::new(Arc::clone(&observer));
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "listener lifecycle event");
        }
    });

    if let Err(e) = supervisor.start(cfg).await {
        error!(error = %e, "supervisor failed to start listeners");
        std::process::exit(3);
    }

    let ops_cancel = CancellationToken::new();
    if !cli.no_ops {
        let ops_supervisor = Arc::clone(&supervisor);
        let ops_registry = registry;
        let cancel = ops_cancel.clone();
        tokio::spawn(async move {
            ops::serve(cli.ops_addr, ops_supervisor, ops_registry, cancel).await;
        });
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining listeners");
    ops_cancel.cancel();
    supervisor.stop().await;
    info!("shutdown complete");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
