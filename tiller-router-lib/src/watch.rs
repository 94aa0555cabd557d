use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use crate::types::RouteEvent;

/// In-process pub/sub bus for route-change events.
///
/// Fan-out never blocks the sender: each subscriber gets a bounded channel
/// and a subscriber that falls behind drops events. Order is preserved per
/// subscriber; there is no global order across subscribers.
#[derive(Default)]
pub struct WatchManager {
    subscribers: Mutex<Vec<mpsc::Sender<RouteEvent>>>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<RouteEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a subscriber channel. The caller keeps the receiving half.
    pub fn watch(&self, tx: mpsc::Sender<RouteEvent>) {
        self.lock().push(tx);
    }

    /// Removes a subscriber. Idempotent: unknown channels are ignored.
    pub fn unwatch(&self, tx: &mpsc::Sender<RouteEvent>) {
        self.lock().retain(|s| !s.same_channel(tx));
    }

    /// Delivers an event to every live subscriber, best effort. Subscribers
    /// whose buffers are full miss this event; closed subscribers are pruned.
    pub fn send(&self, event: RouteEvent) {
        let mut subs = self.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(id = %event.id, "slow route-event subscriber, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[tokio::test]
    async fn delivers_to_live_subscribers_in_order() {
        let wm = WatchManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        wm.watch(tx);

        wm.send(RouteEvent::set("a.test"));
        wm.send(RouteEvent::remove("deadbeef"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, EventKind::Set);
        assert_eq!(first.id, "a.test");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, EventKind::Remove);
    }

    #[tokio::test]
    async fn unwatch_stops_delivery_and_is_idempotent() {
        let wm = WatchManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        wm.watch(tx.clone());

        wm.unwatch(&tx);
        wm.unwatch(&tx);
        wm.send(RouteEvent::set("a.test"));

        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_subscriber_drops_events_without_blocking() {
        let wm = WatchManager::new();
        let (tx, mut rx) = mpsc::channel(1);
        wm.watch(tx);

        wm.send(RouteEvent::set("one.test"));
        wm.send(RouteEvent::set("two.test"));

        assert_eq!(rx.recv().await.unwrap().id, "one.test");
        assert!(rx.try_recv().is_err());
        assert_eq!(wm.subscriber_count(), 1);
    }
}
