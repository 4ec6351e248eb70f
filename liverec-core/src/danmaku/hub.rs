use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::event::DecodedEvent;

/// Handle identifying one subscription
pub type SubscriptionId = u64;

/// A live subscription: events arrive on `receiver` in decode order.
///
/// The queue is unbounded so a slow consumer (e.g. a caption writer
/// waiting on disk) never stalls the receive loop or other subscribers.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<DecodedEvent>,
}

/// Fan-out of decoded events to every current subscriber
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<DashMap<SubscriptionId, mpsc::UnboundedSender<DecodedEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        debug!(subscription_id = id, "Danmaku subscriber added");

        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber; its receiver sees the channel close.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscription_id = id, "Danmaku subscriber removed");
        } else {
            warn!(subscription_id = id, "Attempted to unsubscribe unknown subscription");
        }
    }

    /// Deliver an event to all subscribers, returning how many received it.
    /// Subscribers whose receiver was dropped are pruned.
    pub fn publish(&self, event: &DecodedEvent) -> usize {
        let mut sent_count = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_ok() {
                sent_count += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
            debug!(subscription_id = id, "Pruned closed danmaku subscriber");
        }

        sent_count
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
