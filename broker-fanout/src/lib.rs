//! Fan-out Engine (C5): drains a topic's pending queues and dispatches each message to
//! every attached stream queue, and provides the per-connection mailbox lifecycle for the
//! SSE handler. Every stream owns an unbounded channel; the publish path is the producer,
//! the stream handler the single consumer — no shared mutable cursor (§9 of spec.md).

use broker_store::Store;
use broker_types::Topic;
use slog::{debug, warn, Logger};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drains `topic`'s pending queues (high-priority first) and pushes each message,
/// serialized to its SSE payload, onto every currently-live stream queue for that topic.
/// A failure to enqueue onto one queue (the receiver has gone away) is logged and does not
/// affect delivery to any other queue.
pub fn dispatch(store: &Store, topic: &str, log: &Logger) {
    let messages = store.drain(topic);
    if messages.is_empty() {
        return;
    }
    let senders = store.stream_senders(topic);
    for msg in &messages {
        let payload = msg.to_sse_payload();
        for (stream_id, tx) in &senders {
            if tx.send(payload.clone()).is_err() {
                warn!(log, "failed to enqueue onto stream queue";
                    "topic" => topic, "stream_id" => stream_id);
            } else {
                debug!(log, "dispatched message to stream"; "topic" => topic, "stream_id" => stream_id);
            }
        }
    }
}

/// Owns the lifecycle of one push-stream connection's mailbox. Registering the handle adds
/// the remote address to the topic's subscriber set and attaches a fresh delivery queue;
/// dropping it (on write failure or client disconnect, whichever the caller observes first)
/// deterministically detaches the queue and moves the address into the unsubscribed set,
/// regardless of which code path triggered the drop.
pub struct StreamHandle {
    store: Arc<Store>,
    topic: Topic,
    id: broker_types::StreamId,
    addr: String,
}

impl StreamHandle {
    /// Attaches a new stream for `topic` from `addr` and returns the handle together with
    /// the receiving half of its delivery queue.
    pub fn attach(
        store: Arc<Store>,
        topic: impl Into<Topic>,
        addr: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let topic = topic.into();
        let addr = addr.into();
        let (id, rx) = store.attach_stream(&topic);
        store.add_subscriber(&topic, addr.clone());
        (
            Self {
                store,
                topic,
                id,
                addr,
            },
            rx,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.store.detach_stream(&self.topic, self.id);
        self.store.remove_subscriber(&self.topic, &self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::{Message, Priority};
    use serde_json::json;

    fn msg(priority: &str) -> Message {
        Message::new(json!({"topic": "t", "priority": priority}))
    }

    #[tokio::test]
    async fn priority_ordering_within_one_dispatch_call() {
        let log = broker_logging::test_logger();
        let store = Arc::new(Store::new());
        let (_handle, mut rx) = StreamHandle::attach(store.clone(), "t", "1.2.3.4");
        store.enqueue("t", msg("low"), Priority::Low);
        store.enqueue("t", msg("high"), Priority::High);
        dispatch(&store, "t", &log);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.contains("\"high\""));
        assert!(second.contains("\"low\""));
    }

    #[tokio::test]
    async fn fan_out_reaches_every_attached_stream() {
        let store = Arc::new(Store::new());
        let log = broker_logging::test_logger();
        let (_h1, mut rx1) = StreamHandle::attach(store.clone(), "t", "1.1.1.1");
        let (_h2, mut rx2) = StreamHandle::attach(store.clone(), "t", "2.2.2.2");

        store.enqueue("t", msg("low"), Priority::Low);
        dispatch(&store, "t", &log);

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropping_handle_detaches_and_marks_unsubscribed() {
        let store = Arc::new(Store::new());
        {
            let (_handle, _rx) = StreamHandle::attach(store.clone(), "t", "9.9.9.9");
            assert_eq!(store.stream_senders("t").len(), 1);
        }
        assert!(store.stream_senders("t").is_empty());
        let snap = store.gossip_snapshot();
        assert!(snap.unsubscribed["t"].contains(&"9.9.9.9".to_string()));
    }
}
