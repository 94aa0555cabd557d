//! Service discovery cache.
//!
//! A [`DiscoveryClient`] hands out [`ServiceSet`] handles: live views of a
//! named service's membership. The set caches member instances, answers
//! snapshot queries without blocking the event source, and fans events out
//! to any number of local watchers. The client backing the trait is
//! pluggable; [`memory::MemoryDiscovery`] is the in-process implementation.

mod memory;

pub use memory::MemoryDiscovery;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, RouterError};

/// How long set establishment waits for the `Current` sentinel before
/// giving up on the event source.
pub const CURRENT_TIMEOUT: Duration = Duration::from_secs(5);

const WATCH_BUFFER: usize = 64;

/// A single backend instance of a service.
///
/// `meta` carries scheduler-assigned labels (`app_id`, `release_id`,
/// `process_type`, `job_id`) that deployment tooling matches events
/// against; the router itself only routes on `addr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    pub addr: String,
    pub meta: HashMap<String, String>,
}

impl Instance {
    pub fn new(addr: impl Into<String>) -> Self {
        Instance { addr: addr.into(), meta: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Up,
    Down,
    /// Sentinel: the initial membership has been fully delivered.
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub instance: Option<Instance>,
}

impl ServiceEvent {
    pub fn up(instance: Instance) -> Self {
        ServiceEvent { kind: ServiceEventKind::Up, instance: Some(instance) }
    }

    pub fn down(instance: Instance) -> Self {
        ServiceEvent { kind: ServiceEventKind::Down, instance: Some(instance) }
    }

    pub fn current() -> Self {
        ServiceEvent { kind: ServiceEventKind::Current, instance: None }
    }
}

/// Hands out live service-set handles by service name.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Establishes a membership view for `name`. Implementations must not
    /// return until the initial membership is known (the `Current`
    /// sentinel has been observed), bounded by [`CURRENT_TIMEOUT`].
    async fn service_set(&self, name: &str) -> Result<ServiceSet>;
}

/// A cached, thread-safe view of one service's live membership.
///
/// Cloning is cheap and shares the underlying cache. Close releases the
/// subscription: watchers see their streams end, and the backing client
/// stops feeding the set.
#[derive(Clone)]
pub struct ServiceSet {
    inner: Arc<SetInner>,
}

struct SetInner {
    name: String,
    members: RwLock<Vec<Instance>>,
    subscribers: Mutex<Vec<mpsc::Sender<ServiceEvent>>>,
    closed: AtomicBool,
}

impl ServiceSet {
    pub(crate) fn new(name: &str) -> Self {
        ServiceSet {
            inner: Arc::new(SetInner {
                name: name.to_string(),
                members: RwLock::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Consistent snapshot of live backend addresses.
    pub fn addrs(&self) -> Vec<String> {
        self.members().into_iter().map(|i| i.addr).collect()
    }

    /// Consistent snapshot of live instances with metadata.
    pub fn members(&self) -> Vec<Instance> {
        self.inner
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscribes to membership events. With `current`, the stream starts
    /// with one `Up` per live member followed by the `Current` sentinel so
    /// the subscriber can detect "caught up". Dropping the receiver
    /// unsubscribes.
    pub fn watch(&self, current: bool) -> mpsc::Receiver<ServiceEvent> {
        let members = if current { self.members() } else { Vec::new() };
        let (tx, rx) = mpsc::channel(WATCH_BUFFER + members.len() + 1);
        for instance in members {
            let _ = tx.try_send(ServiceEvent::up(instance));
        }
        if current {
            let _ = tx.try_send(ServiceEvent::current());
        }
        if self.is_closed() {
            // Leave the sender unregistered: the stream ends right after
            // any pre-filled events, mirroring a dropped watcher.
            return rx;
        }
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Releases the subscription. Idempotent. Watcher streams end.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Applies a membership event to the cache and fans it out to watchers.
    /// Called by the backing discovery client; no-op once closed.
    pub(crate) fn apply(&self, event: ServiceEvent) {
        if self.is_closed() {
            return;
        }
        {
            let mut members = self
                .inner
                .members
                .write()
                .unwrap_or_else(|e| e.into_inner());
            match (&event.kind, &event.instance) {
                (ServiceEventKind::Up, Some(inst)) => {
                    match members.iter_mut().find(|m| m.addr == inst.addr) {
                        Some(existing) => *existing = inst.clone(),
                        None => members.push(inst.clone()),
                    }
                }
                (ServiceEventKind::Down, Some(inst)) => {
                    members.retain(|m| m.addr != inst.addr);
                }
                _ => {}
            }
        }

        let mut subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(service = %self.inner.name, "slow service watcher, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Drains `rx` until the `Current` sentinel arrives, bounded by
/// [`CURRENT_TIMEOUT`]. Used during set establishment so callers never
/// observe a half-delivered initial membership.
pub async fn await_current(rx: &mut mpsc::Receiver<ServiceEvent>) -> Result<()> {
    let wait = tokio::time::timeout(CURRENT_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if event.kind == ServiceEventKind::Current {
                return true;
            }
        }
        false
    });
    match wait.await {
        Ok(true) => Ok(()),
        Ok(false) => Err(RouterError::Discovery(
            "event stream closed before current sentinel".into(),
        )),
        Err(_) => Err(RouterError::Discovery(
            "timed out waiting for current sentinel".into(),
        )),
    }
}
