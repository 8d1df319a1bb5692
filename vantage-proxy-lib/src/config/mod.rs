//! Configuration: wire format, typed domain model, and the validator that
//! connects them (spec §3, §4.A).

pub mod model;
pub mod raw;
pub mod validate;

pub use model::*;
pub use validate::validate;

use crate::error::{ProxyError, Result};
use std::path::Path;

/// Reads and parses a TOML file at `path`, then validates it into a
/// [`Config`] snapshot. Used both at startup and on every hot-reload tick.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    let raw: raw::RawConfig = toml::from_str(text).map_err(|e| ProxyError::ConfigInvalid {
        path: "<root>".to_string(),
        message: e.to_string(),
    })?;
    Ok(validate(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_toml() {
        let toml = r#"
            [[http_rules]]
            listen_addr = "127.0.0.1:8080"

            [[http_rules.routes]]
            upstreams = [{ url = "http://127.0.0.1:9000" }]
        "#;
        let cfg = load_from_str(toml).expect("should load");
        assert_eq!(cfg.http_rules.len(), 1);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = load_from_str("not valid = [[[").unwrap_err();
        match err {
            ProxyError::ConfigInvalid { .. } => {}
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }
}
