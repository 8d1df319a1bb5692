use thiserror::Error;

/// Top-level errors surfaced outside of a single request's lifecycle.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("configuration invalid at `{path}`: {message}")]
    ConfigInvalid { path: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("no private key found in key file")]
    NoPrivateKey,

    #[error("bind error on {addr}: {reason}")]
    BindError { addr: String, reason: String },

    #[error("fatal supervisor error: {0}")]
    Supervisor(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error produced by [`crate::config::validate`]. Carries a dotted path to the
/// offending field so the management UI can point at it directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl From<ValidationError> for ProxyError {
    fn from(e: ValidationError) -> Self {
        ProxyError::ConfigInvalid { path: e.path, message: e.message }
    }
}
