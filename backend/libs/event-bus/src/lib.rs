//! In-process publish/subscribe bus.
//!
//! Topics are plain strings. Subscribers are named (the name only shows up in
//! logs) and receive every message published on their topic, in publish
//! order. Publishing never blocks: each subscriber gets its own unbounded
//! channel and a slow consumer only grows its own queue. Messages are not
//! persisted; the durable archive happens before publish at the call sites
//! that need it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::trace;

/// A single message on a topic.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub message: Vec<u8>,
}

struct Subscription {
    name: String,
    sender: mpsc::UnboundedSender<Event>,
}

/// Topic broadcast hub. Clones share the subscriber table.
#[derive(Clone, Default)]
pub struct PubSub {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every subscriber of `topic`. Subscribers whose
    /// receiver has been dropped are pruned here.
    pub fn publish(&self, topic: &str, message: &[u8]) {
        let mut table = self.subscriptions.write().expect("pubsub lock poisoned");
        let Some(subs) = table.get_mut(topic) else {
            trace!(topic, "publish with no subscribers");
            return;
        };
        subs.retain(|sub| {
            let delivered = sub
                .sender
                .send(Event {
                    topic: topic.to_string(),
                    message: message.to_vec(),
                })
                .is_ok();
            if !delivered {
                trace!(topic, subscriber = %sub.name, "dropping closed subscriber");
            }
            delivered
        });
    }

    /// Register `name` on `topic`. The returned receiver yields events in
    /// publish order until the `PubSub` is dropped or the receiver is closed.
    pub fn subscribe(&self, name: &str, topic: &str) -> mpsc::UnboundedReceiver<Event> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut table = self.subscriptions.write().expect("pubsub lock poisoned");
        table.entry(topic.to_string()).or_default().push(Subscription {
            name: name.to_string(),
            sender,
        });
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers_in_order() {
        let bus = PubSub::new();
        let mut first = bus.subscribe("first", "topic.a");
        let mut second = bus.subscribe("second", "topic.a");

        bus.publish("topic.a", b"one");
        bus.publish("topic.a", b"two");

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap().message, b"one");
            assert_eq!(rx.recv().await.unwrap().message, b"two");
        }
    }

    #[tokio::test]
    async fn topics_do_not_cross() {
        let bus = PubSub::new();
        let mut a = bus.subscribe("sub", "topic.a");
        let mut b = bus.subscribe("sub", "topic.b");

        bus.publish("topic.a", b"for-a");

        assert_eq!(a.recv().await.unwrap().message, b"for-a");
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_survives_dropped_subscriber() {
        let bus = PubSub::new();
        let rx = bus.subscribe("gone", "topic.a");
        drop(rx);

        let mut live = bus.subscribe("live", "topic.a");
        bus.publish("topic.a", b"msg");
        assert_eq!(live.recv().await.unwrap().message, b"msg");
    }
}
