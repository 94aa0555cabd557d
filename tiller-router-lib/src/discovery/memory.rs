use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

use super::{await_current, DiscoveryClient, Instance, ServiceEvent, ServiceSet};

#[derive(Default)]
struct ServiceState {
    instances: Vec<Instance>,
    sets: Vec<ServiceSet>,
}

/// In-process discovery client.
///
/// Holds authoritative membership per service and feeds every live
/// [`ServiceSet`] as instances register and unregister. Stands in for the
/// network discovery service the same way an in-memory store backend
/// stands in for its database.
#[derive(Default, Clone)]
pub struct MemoryDiscovery {
    services: Arc<Mutex<HashMap<String, ServiceState>>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServiceState>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Brings an instance up, replacing any previous registration for the
    /// same address.
    pub fn register(&self, service: &str, instance: Instance) {
        let mut services = self.lock();
        let state = services.entry(service.to_string()).or_default();
        match state.instances.iter_mut().find(|i| i.addr == instance.addr) {
            Some(existing) => *existing = instance.clone(),
            None => state.instances.push(instance.clone()),
        }
        Self::feed(state, ServiceEvent::up(instance));
    }

    /// Takes an instance down. Unknown addresses are ignored.
    pub fn unregister(&self, service: &str, addr: &str) {
        let mut services = self.lock();
        let Some(state) = services.get_mut(service) else {
            return;
        };
        let Some(pos) = state.instances.iter().position(|i| i.addr == addr) else {
            return;
        };
        let instance = state.instances.remove(pos);
        Self::feed(state, ServiceEvent::down(instance));
    }

    fn feed(state: &mut ServiceState, event: ServiceEvent) {
        state.sets.retain(|set| !set.is_closed());
        for set in &state.sets {
            set.apply(event.clone());
        }
    }
}

#[async_trait]
impl DiscoveryClient for MemoryDiscovery {
    async fn service_set(&self, name: &str) -> Result<ServiceSet> {
        let set = ServiceSet::new(name);
        let mut rx = set.watch(false);
        {
            let mut services = self.lock();
            let state = services.entry(name.to_string()).or_default();
            state.sets.push(set.clone());
            for instance in state.instances.clone() {
                set.apply(ServiceEvent::up(instance));
            }
            set.apply(ServiceEvent::current());
        }
        await_current(&mut rx).await?;
        debug!(service = name, members = set.addrs().len(), "service set established");
        Ok(set)
    }
}
