use std::fmt;
use std::sync::Arc;

use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::debug;

use crate::table::RouteTable;

/// Resolves the serving certificate during the TLS handshake from the
/// live route table, keyed by SNI.
///
/// No SNI falls back to the listener-wide certificate when one is
/// configured. SNI naming a host with no route fails the handshake (the
/// client sees a TLS alert), which keeps unknown domains from being
/// served a certificate they were never configured with.
pub struct RouteCertResolver {
    table: Arc<RouteTable>,
    fallback: Option<Arc<CertifiedKey>>,
}

impl RouteCertResolver {
    pub fn new(table: Arc<RouteTable>, fallback: Option<Arc<CertifiedKey>>) -> Self {
        RouteCertResolver { table, fallback }
    }
}

impl ResolvesServerCert for RouteCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match client_hello.server_name() {
            Some(name) => {
                let Some(route) = self.table.find_route_for_host(name) else {
                    debug!(server_name = name, "no route for SNI, failing handshake");
                    return None;
                };
                route.keypair.clone().or_else(|| self.fallback.clone())
            }
            None => self.fallback.clone(),
        }
    }
}

impl fmt::Debug for RouteCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteCertResolver")
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
