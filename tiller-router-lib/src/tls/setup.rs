use std::sync::Arc;

use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::table::RouteTable;

use super::RouteCertResolver;

/// Builds the TLS acceptor for the listener: per-route certificates via
/// SNI, optional listener-wide fallback, HTTP/1.1 over the default
/// forward-secrecy suite profile of the aws-lc-rs provider.
pub fn build_tls_acceptor(
    table: Arc<RouteTable>,
    fallback: Option<Arc<CertifiedKey>>,
) -> TlsAcceptor {
    let resolver = RouteCertResolver::new(table, fallback);
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsAcceptor::from(Arc::new(config))
}
