use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{Result, RouterError};
use crate::types::Route;

use super::{RouteStore, SyncHandler};

const CHANGE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Change {
    Set(Route),
    Remove(String),
}

/// In-process route store.
///
/// Rows live in a map; change notifications fan out over a broadcast
/// channel the way a SQL store would use LISTEN/NOTIFY. A sync loop that
/// falls behind the channel reconciles against a fresh full read, keeping
/// the at-least-once contract.
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Route>>,
    changes: broadcast::Sender<Change>,
    stop: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (stop, _) = watch::channel(false);
        MemoryStore { rows: Mutex::new(HashMap::new()), changes, stop }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Route>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, change: Change) {
        // Send only fails with no live subscribers, which is fine: the
        // next sync loop starts from a full read.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn add(&self, route: &Route) -> Result<()> {
        self.set(route).await
    }

    async fn set(&self, route: &Route) -> Result<()> {
        if route.id.is_empty() {
            return Err(RouterError::Store("route has no id".into()));
        }
        self.lock().insert(route.id.clone(), route.clone());
        self.notify(Change::Set(route.clone()));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if self.lock().remove(id).is_none() {
            return Err(RouterError::NotFound);
        }
        self.notify(Change::Remove(id.to_string()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Route>> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn sync(
        self: Arc<Self>,
        handler: Arc<dyn SyncHandler>,
        started: oneshot::Sender<Result<()>>,
    ) {
        // Subscribe before the initial read so transitions committed in
        // between are replayed from the channel, not lost.
        let mut changes = self.changes.subscribe();
        let mut stop = self.stop.subscribe();

        let mut known: HashSet<String> = HashSet::new();
        let initial = self.lock().values().cloned().collect::<Vec<_>>();
        for route in initial {
            known.insert(route.id.clone());
            if let Err(e) = handler.set(route).await {
                let _ = started.send(Err(e));
                return;
            }
        }
        let _ = started.send(Ok(()));

        if *stop.borrow() {
            return;
        }
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("route store sync stopped");
                        return;
                    }
                }
                change = changes.recv() => match change {
                    Ok(Change::Set(route)) => {
                        known.insert(route.id.clone());
                        if let Err(e) = handler.set(route).await {
                            warn!(error = %e, "sync handler rejected route set");
                        }
                    }
                    Ok(Change::Remove(id)) => {
                        known.remove(&id);
                        if let Err(e) = handler.remove(&id).await {
                            warn!(error = %e, "sync handler rejected route removal");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "route change stream lagged, resyncing");
                        if let Err(e) = resync(&self, handler.as_ref(), &mut known).await {
                            warn!(error = %e, "route store resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    fn stop_sync(&self) {
        self.stop.send_replace(true);
    }
}

/// Reconciles the handler against a fresh full read after the change
/// stream dropped events: removed rows get `remove`, everything else is
/// re-`set`. Re-delivery is within the at-least-once contract.
async fn resync(
    store: &MemoryStore,
    handler: &dyn SyncHandler,
    known: &mut HashSet<String>,
) -> Result<()> {
    let rows = store.lock().clone();
    let gone: Vec<String> = known
        .iter()
        .filter(|id| !rows.contains_key(*id))
        .cloned()
        .collect();
    for id in gone {
        known.remove(&id);
        handler.remove(&id).await?;
    }
    for (id, route) in rows {
        known.insert(id);
        handler.set(route).await?;
    }
    Ok(())
}
