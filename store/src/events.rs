//! Change-notification bus.
//!
//! Subscribers receive messages over unbounded channels, so a slow or dead
//! subscriber never blocks delivery to the others. Unsubscribing is safe at
//! any time, including from within a notification handler, because the handler
//! runs in the subscriber's own task, never inside `publish`.

use std::sync::Arc;

use dashmap::DashMap;
use satchel_engine::Record;
use tokio::sync::mpsc;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// A change notification for one record.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Collection of the affected record
    pub collection: String,
    /// Id of the affected record
    pub record_id: String,
    /// Upsert or deletion
    pub kind: ChangeKind,
    /// The new record state; `None` for deletions
    pub record: Option<Record>,
}

struct Subscriber<T> {
    /// Deliver only messages published under this topic; `None` receives
    /// everything.
    topic: Option<String>,
    sender: mpsc::UnboundedSender<T>,
}

/// Topic-filtered fan-out bus.
///
/// Thread-safe and shared across components via `Arc`.
pub struct Bus<T> {
    subscribers: DashMap<String, Subscriber<T>>,
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Bus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Create a bus wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber, optionally filtered to one topic.
    ///
    /// Returns the subscription id and the receiving channel.
    pub fn subscribe(&self, topic: Option<&str>) -> (String, mpsc::UnboundedReceiver<T>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers.insert(
            id.clone(),
            Subscriber {
                topic: topic.map(str::to_string),
                sender,
            },
        );

        tracing::debug!(subscription = %id, "subscriber registered");
        (id, receiver)
    }

    /// Remove a subscriber. Returns whether it was present.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Deliver a message to every matching subscriber.
    ///
    /// Returns the number of deliveries. Closed channels are pruned; a
    /// failing subscriber never prevents delivery to the rest.
    pub fn publish(&self, topic: Option<&str>, message: &T) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            let matches = match &subscriber.topic {
                None => true,
                Some(wanted) => Some(wanted.as_str()) == topic,
            };
            if !matches {
                continue;
            }

            if subscriber.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
            tracing::debug!(subscription = %id, "dropped closed subscriber");
        }

        delivered
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Bus carrying record change events, topic = collection name.
pub type ChangeBus = Bus<ChangeEvent>;
