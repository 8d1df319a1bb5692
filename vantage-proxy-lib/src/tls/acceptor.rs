use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use super::session_resumption::{configure_session_resumption, SessionResumptionConfig};
use crate::config::TlsMaterial;
use crate::error::{ProxyError, Result};

/// Builds a TLS acceptor from a rule's [`TlsMaterial`], generalizing the
/// teacher's `build_rustls` (which read its paths off a single global
/// `TlsConfig`) to the per-rule cert/key pairs the new listener model
/// carries. ALPN always advertises h2 then http/1.1 — there is no
/// per-rule ALPN override in this design.
pub fn build_rustls(material: &TlsMaterial) -> Result<TlsAcceptor> {
    let certs = {
        let bytes = std::fs::read(&material.cert)
            .map_err(|e| ProxyError::Tls(format!("failed to read certificate: {e}")))?;
        CertificateDer::pem_slice_iter(&bytes)
            .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
            .map_err(|e| ProxyError::Tls(format!("failed to parse certificates: {e}")))?
    };

    let key = {
        let bytes = std::fs::read(&material.key)
            .map_err(|e| ProxyError::Tls(format!("failed to read key: {e}")))?;
        let mut keys: Vec<PrivateKeyDer<'_>> = PrivateKeyDer::pem_slice_iter(&bytes)
            .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
            .map_err(|e| ProxyError::Tls(format!("failed to parse private key: {e}")))?;
        let Some(k) = keys.pop() else {
            return Err(ProxyError::NoPrivateKey);
        };
        k
    };

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(format!("failed to build TLS config: {e}")))?;

    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    configure_session_resumption(&mut server, &SessionResumptionConfig::default());

    Ok(TlsAcceptor::from(Arc::new(server)))
}
