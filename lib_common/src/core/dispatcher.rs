//! # Fan-out Message Dispatcher
//!
//! The `Dispatcher` takes one message per feed cycle and hands it to every
//! consumer subscribed at the moment of the call.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: A published message is wrapped in an `Arc` once;
//!     each consumer receives a pointer to the same allocation.
//!
//! 2.  **No Backlog**: Delivery is into each consumer's own unbounded MPSC
//!     queue. Consumers that subscribe after a publish never see it, and a
//!     consumer that has gone away simply misses it.
//!
//! 3.  **Per-Consumer Failure**: A consumer whose receiver was dropped is
//!     logged and removed; delivery to everyone else carries on.
//!
//! 4.  **Idempotent Membership**: Subscribing an id that is already present, or
//!     unsubscribing one that is absent, is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Membership handle of one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// The raw numeric id, for logs.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// # Client Handle
///
/// Internal record of one subscribed consumer.
struct ClientHandle<M> {
    /// Membership handle.
    id: ClientId,
    /// Human-readable origin of the consumer (e.g. the remote address).
    label: String,
    /// Sending half of the consumer's queue.
    sender: mpsc::UnboundedSender<Arc<M>>,
}

/// # Core Dispatcher
///
/// Manages consumer membership and broadcasts messages of type `M`.
pub struct Dispatcher<M> {
    clients: Mutex<Vec<ClientHandle<M>>>,
    next_id: AtomicU64,
}

impl<M> Default for Dispatcher<M> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<M> Dispatcher<M> {
    /// Creates a dispatcher with no consumers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh membership handle; it is not subscribed yet.
    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// # Subscribe
    ///
    /// Registers `sender` as the queue of consumer `id`.
    ///
    /// Returns `false` and changes nothing if `id` is already subscribed.
    pub fn subscribe(&self, id: ClientId, label: &str, sender: mpsc::UnboundedSender<Arc<M>>) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.iter().any(|c| c.id == id) {
            log::debug!("{} ({}) is already subscribed", id, label);
            return false;
        }
        clients.push(ClientHandle {
            id,
            label: label.to_string(),
            sender,
        });
        log::info!("{} ({}) subscribed. Consumers: {}", id, label, clients.len());
        true
    }

    /// Allocates a handle, creates its queue and subscribes it in one step.
    pub fn join(&self, label: &str) -> (ClientId, mpsc::UnboundedReceiver<Arc<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.allocate_id();
        self.subscribe(id, label, tx);
        (id, rx)
    }

    /// Removes consumer `id`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: ClientId) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|c| c.id != id);
        let removed = clients.len() != before;
        if removed {
            log::info!("{} unsubscribed. Consumers: {}", id, clients.len());
        }
        removed
    }

    /// Whether `id` is currently subscribed.
    pub fn is_subscribed(&self, id: ClientId) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| c.id == id)
    }

    /// Number of consumers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// # Publish
    ///
    /// Wraps `message` in an `Arc` and delivers it to every current consumer.
    /// Returns the number of consumers it reached.
    pub fn publish(&self, message: M) -> usize {
        self.publish_shared(Arc::new(message))
    }

    /// Like [`Dispatcher::publish`] for a message that is already shared.
    ///
    /// Consumers whose queue is closed are logged and dropped from the list.
    pub fn publish_shared(&self, message: Arc<M>) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        clients.retain(|client| match client.sender.send(Arc::clone(&message)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::warn!(
                    "Delivery to {} ({}) failed: consumer is gone. Removing from dispatcher.",
                    client.id,
                    client.label
                );
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_current_consumer() {
        let dispatcher = Dispatcher::<String>::new();
        let (_a, mut rx_a) = dispatcher.join("a");
        let (_b, mut rx_b) = dispatcher.join("b");

        assert_eq!(dispatcher.publish("tick".to_string()), 2);
        assert_eq!(rx_a.try_recv().unwrap().as_str(), "tick");
        assert_eq!(rx_b.try_recv().unwrap().as_str(), "tick");
    }

    #[test]
    fn late_subscribers_get_no_replay() {
        let dispatcher = Dispatcher::<u32>::new();
        let (_early, mut early_rx) = dispatcher.join("early");
        dispatcher.publish(1);

        let (_late, mut late_rx) = dispatcher.join("late");
        assert!(late_rx.try_recv().is_err());

        dispatcher.publish(2);
        assert_eq!(*early_rx.try_recv().unwrap(), 1);
        assert_eq!(*early_rx.try_recv().unwrap(), 2);
        assert_eq!(*late_rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn membership_calls_are_idempotent() {
        let dispatcher = Dispatcher::<u32>::new();
        let id = dispatcher.allocate_id();
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(dispatcher.subscribe(id, "ws", tx.clone()));
        assert!(!dispatcher.subscribe(id, "ws", tx));
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.publish(7);
        assert_eq!(*rx.try_recv().unwrap(), 7);
        assert!(rx.try_recv().is_err(), "double subscribe must not double deliver");

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert!(!dispatcher.is_subscribed(id));
        assert_eq!(dispatcher.publish(8), 0);
    }

    #[test]
    fn dropped_consumer_does_not_block_others() {
        let dispatcher = Dispatcher::<u32>::new();
        let (_gone, gone_rx) = dispatcher.join("gone");
        let (_alive, mut alive_rx) = dispatcher.join("alive");
        drop(gone_rx);

        assert_eq!(dispatcher.publish(3), 1);
        assert_eq!(*alive_rx.try_recv().unwrap(), 3);
        assert_eq!(dispatcher.subscriber_count(), 1);
    }
}
