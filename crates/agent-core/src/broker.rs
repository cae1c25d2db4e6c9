//! Per-key publish/subscribe fan-out: many subscribers receive the event
//! stream of a single in-flight job.
//!
//! Built on [`tokio::sync::broadcast`], whose lagging-receiver behavior is
//! exactly the drop-oldest overflow the contract asks for: a slow
//! subscriber skips missed progress events (observing `RecvError::Lagged`)
//! instead of blocking the publisher or other subscribers.

use std::collections::HashMap;
use std::sync::Mutex;

use agent_types::Event;
use tokio::sync::broadcast;

/// Queue capacity per key. Comfortably above the ≥200 floor the contract
/// requires.
const EVENT_QUEUE_CAPACITY: usize = 256;

pub struct Broker {
    inner: Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Broker { inner: Mutex::new(HashMap::new()) }
    }

    /// Subscribes to `key`'s event stream, creating the channel if no job
    /// is currently running for it. The returned bool is `true` when this
    /// call created the channel — the caller becomes responsible for
    /// running the job in that case.
    pub fn subscribe(&self, key: &str) -> (broadcast::Receiver<Event>, bool) {
        let mut map = self.inner.lock().expect("broker mutex poisoned");
        if let Some(sender) = map.get(key) {
            return (sender.subscribe(), false);
        }
        let (sender, receiver) = broadcast::channel(EVENT_QUEUE_CAPACITY);
        map.insert(key.to_string(), sender);
        (receiver, true)
    }

    /// Copies `event` to every current subscriber of `key`. A no-op if no
    /// channel exists for `key` (e.g. after `finish` already ran).
    pub fn publish(&self, key: &str, event: Event) {
        let map = self.inner.lock().expect("broker mutex poisoned");
        if let Some(sender) = map.get(key) {
            // Err means zero receivers; nothing to deliver to.
            let _ = sender.send(event);
        }
    }

    /// Publishes the terminal event and removes `key`'s channel in one
    /// critical section, so a subscriber racing to attach either observes
    /// the channel (and is guaranteed to receive this event, since its
    /// `subscribe` call would have to precede this lock acquisition) or
    /// observes nothing and falls back to a filesystem re-check.
    pub fn finish(&self, key: &str, terminal: Event) {
        let mut map = self.inner.lock().expect("broker mutex poisoned");
        if let Some(sender) = map.remove(key) {
            let _ = sender.send(terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_event(id: &str) -> Event {
        Event::Start { id: id.to_string(), version: "1.0.0".to_string() }
    }

    fn completed_event(id: &str) -> Event {
        Event::Completed { id: id.to_string(), version: "1.0.0".to_string(), path: "/p".to_string() }
    }

    #[tokio::test]
    async fn first_subscriber_owns_the_job() {
        let broker = Broker::new();
        let (_rx, is_new) = broker.subscribe("k");
        assert!(is_new);
        let (_rx2, is_new2) = broker.subscribe("k");
        assert!(!is_new2);
    }

    #[tokio::test]
    async fn all_subscribers_receive_published_events() {
        let broker = Broker::new();
        let (mut rx1, _) = broker.subscribe("k");
        let (mut rx2, _) = broker.subscribe("k");
        broker.publish("k", start_event("a"));
        assert_eq!(rx1.recv().await.unwrap(), start_event("a"));
        assert_eq!(rx2.recv().await.unwrap(), start_event("a"));
    }

    #[tokio::test]
    async fn finish_delivers_terminal_event_then_closes() {
        let broker = Broker::new();
        let (mut rx, _) = broker.subscribe("k");
        broker.finish("k", completed_event("a"));
        assert_eq!(rx.recv().await.unwrap(), completed_event("a"));
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test]
    async fn subscribing_after_finish_creates_a_fresh_channel() {
        let broker = Broker::new();
        let (_rx, _) = broker.subscribe("k");
        broker.finish("k", completed_event("a"));
        // The key is gone from the map now; a new subscribe is a new job owner.
        let (_rx2, is_new) = broker.subscribe("k");
        assert!(is_new);
    }

    #[tokio::test]
    async fn publish_after_finish_is_a_harmless_no_op() {
        let broker = Broker::new();
        broker.finish("k", completed_event("a")); // no channel existed yet
        broker.publish("k", start_event("a")); // must not panic
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publish() {
        let broker = Broker::new();
        let (mut slow, _) = broker.subscribe("k");
        for i in 0..(EVENT_QUEUE_CAPACITY + 10) {
            broker.publish(
                "k",
                Event::Progress { id: "a".into(), version: "1".into(), message: format!("{i}") },
            );
        }
        // The slow receiver is behind the whole queue; first recv reports lag.
        assert!(matches!(slow.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
