#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod observer;
pub mod pool;
pub mod proxy;
pub mod route_matcher;
pub mod security;
pub mod selector;
pub mod stream;
pub mod supervisor;
pub mod tls;
pub mod transform;
pub mod ws;

pub use config::{load_from_path, load_from_str, Config};
pub use error::{ProxyError, Result};
pub use observer::{init_prom_metrics, NullSink, Observer};
pub use supervisor::{ConfigStore, FileConfigStore, Supervisor};
