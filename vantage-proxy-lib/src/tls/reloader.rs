//! Hot-reloadable TLS acceptor (spec §4.H "TLS termination", §9 "shared
//! mutable config via snapshots").
//!
//! The teacher's `tls/reloader.rs` wired this through the `hot_reload`
//! crate (`Reload`, `ReloaderService`), which isn't a dependency of any
//! Cargo.toml in the corpus. Substituted here with a [`notify`]
//! filesystem watcher over the cert/key paths plus an [`ArcSwap`] holding
//! the live [`TlsAcceptor`] — no crate the corpus doesn't already pull in
//! for some other purpose.

use super::acceptor::build_rustls;
use crate::config::TlsMaterial;
use crate::error::Result;
use arc_swap::ArcSwap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

pub struct ReloadingAcceptor {
    current: Arc<ArcSwap<TlsAcceptor>>,
    _watcher: RecommendedWatcher,
}

impl ReloadingAcceptor {
    /// Builds the initial acceptor from `material` and spawns a background
    /// watcher that rebuilds it whenever the cert or key file changes.
    /// Rebuild failures are logged and the previous acceptor stays live —
    /// a bad reload must never tear down an already-running listener.
    pub fn spawn(material: TlsMaterial) -> Result<Self> {
        let initial = build_rustls(&material)?;
        let current = Arc::new(ArcSwap::from_pointee(initial));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| crate::error::ProxyError::Tls(format!("failed to start TLS watcher: {e}")))?;

        for path in [&material.cert, &material.key] {
            if let Some(parent) = PathBuf::from(path).parent() {
                let _ = watcher.watch(parent, RecursiveMode::NonRecursive);
            }
        }

        let current_for_task = current.clone();
        let watched_material = material;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    continue;
                }
                match build_rustls(&watched_material) {
                    Ok(acceptor) => {
                        current_for_task.store(Arc::new(acceptor));
                        tracing::info!(cert = %watched_material.cert, "reloaded TLS certificate");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "TLS reload failed, keeping previous acceptor");
                    }
                }
            }
        });

        Ok(Self { current, _watcher: watcher })
    }

    pub fn current(&self) -> Arc<TlsAcceptor> {
        self.current.load_full()
    }
}
