use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::debug;

use crate::discovery::{DiscoveryClient, ServiceSet};
use crate::error::{Result, RouterError};
use crate::store::SyncHandler;
use crate::tls::parse_keypair;
use crate::types::{Route, RouteEvent};
use crate::watch::WatchManager;

/// Wildcard domains are matched at most this many label segments deep.
const MAX_WILDCARD_DEPTH: usize = 5;

/// A route as held by the table: parsed TLS material and a live service
/// set in place of the PEM strings and service name of the stored row.
pub struct HttpRoute {
    pub route: Route,
    pub keypair: Option<Arc<CertifiedKey>>,
    pub service: ServiceSet,
}

impl HttpRoute {
    pub fn domain(&self) -> &str {
        &self.route.domain
    }

    pub fn sticky(&self) -> bool {
        self.route.sticky
    }
}

struct ServiceEntry {
    set: ServiceSet,
    refs: usize,
}

#[derive(Default)]
struct TableInner {
    routes: HashMap<String, Arc<HttpRoute>>,
    domains: HashMap<String, Arc<HttpRoute>>,
    services: HashMap<String, ServiceEntry>,
    closed: bool,
}

impl TableInner {
    /// Drops one reference to a service entry, closing its discovery
    /// subscription when the last route stops using it.
    fn release_service(&mut self, name: &str) {
        let remove = match self.services.get_mut(name) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = self.services.remove(name) {
                debug!(service = name, "closing unreferenced service set");
                entry.set.close();
            }
        }
    }
}

/// In-memory route table: the host → route mapping every request consults
/// and the single writer target of the store sync loop.
///
/// Two maps are kept in lockstep under one reader-writer lock, keyed by
/// route id and by lowercased domain. Service sets are shared across
/// routes and refcounted; an entry's subscription is torn down exactly
/// when the last referencing route goes away. The lock is never held
/// across I/O: discovery subscriptions are established before the write
/// lock is taken.
pub struct RouteTable {
    inner: RwLock<TableInner>,
    discovery: Arc<dyn DiscoveryClient>,
    watch: Arc<WatchManager>,
}

impl RouteTable {
    pub fn new(discovery: Arc<dyn DiscoveryClient>, watch: Arc<WatchManager>) -> Self {
        RouteTable {
            inner: RwLock::new(TableInner::default()),
            discovery,
            watch,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or updates a route. The store sync loop is the only caller
    /// besides tests; invocations are serialized by contract.
    pub async fn set(&self, mut route: Route) -> Result<()> {
        let keypair = if !route.tls_cert.is_empty() && !route.tls_key.is_empty() {
            let kp = parse_keypair(&route.tls_cert, &route.tls_key)?;
            route.tls_cert.clear();
            route.tls_key.clear();
            Some(kp)
        } else {
            None
        };

        // Establish the discovery subscription outside the lock; requests
        // keep being served off the old state while this awaits.
        let pool_exists = {
            let inner = self.read();
            if inner.closed {
                return Ok(());
            }
            inner.services.contains_key(&route.service)
        };
        let created = if pool_exists {
            None
        } else {
            Some(self.discovery.service_set(&route.service).await?)
        };

        let domain = route.domain.clone();
        {
            let mut inner = self.write();
            if inner.closed {
                if let Some(set) = created {
                    set.close();
                }
                return Ok(());
            }

            // A service rename on update drops the reference to the old
            // entry. Same-service updates keep their reference untouched.
            let prev_service = inner
                .routes
                .get(&route.id)
                .map(|old| old.service.name().to_string());
            let needs_ref = match prev_service {
                Some(prev) if prev == route.service => false,
                Some(prev) => {
                    inner.release_service(&prev);
                    true
                }
                None => true,
            };

            let entry = match inner.services.entry(route.service.clone()) {
                Entry::Occupied(occupied) => {
                    if let Some(raced) = created {
                        raced.close();
                    }
                    occupied.into_mut()
                }
                Entry::Vacant(vacant) => {
                    let Some(set) = created else {
                        return Err(RouterError::Discovery(format!(
                            "service entry for {} vanished during update",
                            route.service
                        )));
                    };
                    vacant.insert(ServiceEntry { set, refs: 0 })
                }
            };
            if needs_ref {
                entry.refs += 1;
            }
            let set = entry.set.clone();

            let http_route = Arc::new(HttpRoute { route, keypair, service: set });
            inner
                .routes
                .insert(http_route.route.id.clone(), http_route.clone());
            inner
                .domains
                .insert(http_route.route.domain.to_lowercase(), http_route);
        }

        self.watch.send(RouteEvent::set(domain));
        Ok(())
    }

    /// Removes a route by id. `RouterError::NotFound` when absent.
    pub async fn remove(&self, id: &str) -> Result<()> {
        {
            let mut inner = self.write();
            if inner.closed {
                return Ok(());
            }
            let Some(route) = inner.routes.remove(id) else {
                return Err(RouterError::NotFound);
            };
            let service = route.service.name().to_string();
            inner.release_service(&service);
            inner.domains.remove(&route.route.domain.to_lowercase());
        }

        self.watch.send(RouteEvent::remove(id));
        Ok(())
    }

    /// Resolves the route serving `host`: exact domain first, then
    /// wildcard keys from most-specific to least-specific.
    pub fn find_route_for_host(&self, host: &str) -> Option<Arc<HttpRoute>> {
        let host = strip_port(host).to_lowercase();
        let inner = self.read();
        if let Some(route) = inner.domains.get(&host) {
            return Some(route.clone());
        }
        let segments: Vec<&str> = host.splitn(MAX_WILDCARD_DEPTH, '.').collect();
        for i in (1..=segments.len()).rev() {
            let key = format!("*.{}", segments[segments.len() - i..].join("."));
            if let Some(route) = inner.domains.get(&key) {
                return Some(route.clone());
            }
        }
        None
    }

    pub fn route(&self, id: &str) -> Option<Arc<HttpRoute>> {
        self.read().routes.get(id).cloned()
    }

    pub fn route_count(&self) -> usize {
        self.read().routes.len()
    }

    /// Current refcount of a service entry, if one exists.
    pub fn service_refs(&self, name: &str) -> Option<usize> {
        self.read().services.get(name).map(|e| e.refs)
    }

    /// Checks that the id and domain maps describe the same route set.
    pub fn maps_consistent(&self) -> bool {
        let inner = self.read();
        inner.routes.len() == inner.domains.len()
            && inner
                .routes
                .values()
                .all(|r| inner.domains.contains_key(&r.route.domain.to_lowercase()))
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Tears down every discovery subscription and rejects further
    /// mutations. Idempotent.
    pub fn close(&self) {
        let mut inner = self.write();
        for (_, entry) in inner.services.drain() {
            entry.set.close();
        }
        inner.routes.clear();
        inner.domains.clear();
        inner.closed = true;
    }
}

#[async_trait]
impl SyncHandler for RouteTable {
    async fn set(&self, route: Route) -> Result<()> {
        RouteTable::set(self, route).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        RouteTable::remove(self, id).await
    }
}

/// Drops a trailing `:port` from an HTTP/1.1 Host header value.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::strip_port;

    #[test]
    fn strip_port_handles_hosts_with_and_without_ports() {
        assert_eq!(strip_port("example.test:8080"), "example.test");
        assert_eq!(strip_port("example.test"), "example.test");
        assert_eq!(strip_port("example.test:"), "example.test:");
    }
}
