//! Route persistence adapter.
//!
//! The router never talks to its backing store directly: it drives a
//! [`RouteStore`] for writes and receives the resulting row-state
//! transitions through a [`SyncHandler`], fed by one long-running sync
//! task. The store contract is at-least-once delivery of every
//! transition, with `set`/`remove` for a given id never overlapping.
//! [`memory::MemoryStore`] is the in-process implementation; a SQL store
//! with LISTEN/NOTIFY semantics plugs into the same traits.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::Route;

/// Receives row-state transitions from the sync loop, serially.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn set(&self, route: Route) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Route storage with a change-notification stream.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Persists a new route. Upserts by id, so re-adding a domain is
    /// idempotent.
    async fn add(&self, route: &Route) -> Result<()>;

    /// Persists an update to an existing route (or creates it).
    async fn set(&self, route: &Route) -> Result<()>;

    /// Deletes a route row. `RouterError::NotFound` when absent.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Reads all current rows.
    async fn list(&self) -> Result<Vec<Route>>;

    /// Runs until [`stop_sync`](RouteStore::stop_sync): performs one full
    /// read invoking `handler.set` per row, posts `started` exactly once
    /// (`Ok` after the initial pass completes, else the error that
    /// prevented it), then streams subsequent transitions to the handler.
    /// Handler invocations are serial; delivery is at-least-once across
    /// reconnects.
    async fn sync(
        self: Arc<Self>,
        handler: Arc<dyn SyncHandler>,
        started: oneshot::Sender<Result<()>>,
    );

    /// Makes the running sync loop return. Idempotent.
    fn stop_sync(&self);
}
