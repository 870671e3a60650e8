//! Cross-thread broadcast of execution events.
//!
//! The blocking worker thread records events deep inside tool code; the
//! async stream task consumes them. The bridge is an unbounded
//! `tokio::sync::mpsc` channel per listener: sending is synchronous and
//! thread-safe, so the worker never blocks, and the send wakes the owning
//! async task regardless of which thread it runs on. Registrations are
//! keyed by the owning request's [`ContextId`], so broadcasts from one
//! request are never observed by another request's stream.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::ExecutionEvent;

/// Identifies the request (execution context) a listener belongs to.
pub type ContextId = Uuid;

/// Handle returned by [`ListenerRegistry::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Sending half of a listener's delivery queue.
pub type EventSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiving half of a listener's delivery queue.
pub type EventReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

struct Registration {
    id: ListenerId,
    context: ContextId,
    sender: EventSender,
}

/// Process-wide set of active listener registrations.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: Vec<Registration>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for the given context. Duplicate senders for the same
    /// context are kept as separate registrations.
    pub fn register(&self, context: ContextId, sender: EventSender) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.entries.push(Registration {
            id,
            context,
            sender,
        });
        id
    }

    /// Remove a listener; a no-op if it was never registered or is already
    /// gone, so cleanup paths can call this unconditionally.
    pub fn unregister(&self, id: ListenerId) {
        self.inner.lock().entries.retain(|entry| entry.id != id);
    }

    /// Deliver a copy of `event` to every listener currently registered for
    /// `context`. The listener set is snapshotted under the lock; delivery
    /// happens outside it so a slow or dead consumer cannot stall the
    /// producer. Send failures (receiver dropped) are swallowed.
    pub fn broadcast(&self, context: ContextId, event: &ExecutionEvent) {
        let senders: Vec<EventSender> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|entry| entry.context == context)
                .map(|entry| entry.sender.clone())
                .collect()
        };

        for sender in senders {
            if sender.send(event.clone()).is_err() {
                tracing::debug!(%context, kind = event.kind(), "Listener gone, event dropped");
            }
        }
    }

    /// Number of listeners registered for a context.
    pub fn listener_count(&self, context: ContextId) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.context == context)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> ExecutionEvent {
        ExecutionEvent::tool_call(name, json!({}))
    }

    #[test]
    fn broadcast_reaches_every_registered_listener_once_in_order() {
        let registry = ListenerRegistry::new();
        let context = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register(context, tx_a);
        registry.register(context, tx_b);

        registry.broadcast(context, &event("list_databases"));
        registry.broadcast(context, &event("run_select_query"));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap().tool_name(), Some("list_databases"));
            assert_eq!(rx.try_recv().unwrap().tool_name(), Some("run_select_query"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn broadcast_is_partitioned_by_context() {
        let registry = ListenerRegistry::new();
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(theirs, tx);

        registry.broadcast(mine, &event("list_tables"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listener_registered_after_broadcast_sees_nothing() {
        let registry = ListenerRegistry::new();
        let context = Uuid::new_v4();
        registry.broadcast(context, &event("list_tables"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(context, tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregistered_listener_stops_receiving() {
        let registry = ListenerRegistry::new();
        let context = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(context, tx);

        registry.broadcast(context, &event("first"));
        registry.unregister(id);
        registry.broadcast(context, &event("second"));

        assert_eq!(rx.try_recv().unwrap().tool_name(), Some("first"));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.listener_count(context), 0);
    }

    #[test]
    fn unregistering_unknown_listener_is_a_noop() {
        let registry = ListenerRegistry::new();
        let context = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(context, tx);

        registry.unregister(ListenerId(9999));
        assert_eq!(registry.listener_count(context), 1);
    }

    #[test]
    fn dead_receiver_does_not_affect_other_listeners() {
        let registry = ListenerRegistry::new();
        let context = Uuid::new_v4();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.register(context, tx_dead);
        registry.register(context, tx_live);
        drop(rx_dead);

        registry.broadcast(context, &event("run_select_query"));
        assert_eq!(
            rx_live.try_recv().unwrap().tool_name(),
            Some("run_select_query")
        );
    }
}
