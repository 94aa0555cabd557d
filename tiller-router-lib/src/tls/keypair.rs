use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::sign::CertifiedKey;

use crate::error::{Result, RouterError};

/// Parses PEM certificate and key material into a ready-to-serve rustls
/// key pair. Routes keep the parsed form and drop the PEM strings.
pub fn parse_keypair(cert_pem: &str, key_pem: &str) -> Result<Arc<CertifiedKey>> {
    let certs = CertificateDer::pem_slice_iter(cert_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| RouterError::Tls(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(RouterError::Tls("no certificates in PEM input".into()));
    }

    let mut keys: Vec<PrivateKeyDer<'static>> = PrivateKeyDer::pem_slice_iter(key_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| RouterError::Tls(format!("Failed to parse private key: {e}")))?;
    let Some(key) = keys.pop() else {
        return Err(RouterError::NoPrivateKey);
    };

    let signing_key = aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| RouterError::Tls(format!("unsupported private key type: {e}")))?;

    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}
