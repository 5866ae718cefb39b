//! Topic Store (C4): per-topic priority queues, bounded log and subscriber sets. All
//! operations are safe under concurrent callers; one `parking_lot::Mutex` guards the whole
//! map (topics are cheap and the cluster is small, so per-topic sharding buys nothing —
//! see DESIGN.md).

use broker_types::{GossipPayload, Message, Priority, StreamId, Topic};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Bound on the per-topic log (invariant 2 of spec.md §3).
pub const LOG_BOUND: usize = 1000;

#[derive(Default)]
struct TopicState {
    pending_high: VecDeque<Message>,
    pending_low: VecDeque<Message>,
    log: VecDeque<Message>,
    stream_queues: HashMap<StreamId, mpsc::UnboundedSender<String>>,
    sse_subscribers: HashSet<String>,
    sse_unsubscribed: HashSet<String>,
    webhooks: Vec<String>,
}

impl TopicState {
    /// Invariant 4: `sse_subscribers ∩ sse_unsubscribed = ∅`.
    fn add_subscriber(&mut self, addr: String) {
        self.sse_unsubscribed.remove(&addr);
        self.sse_subscribers.insert(addr);
    }

    fn remove_subscriber(&mut self, addr: &str) {
        self.sse_subscribers.remove(addr);
        self.sse_unsubscribed.insert(addr.to_string());
    }
}

pub struct Store {
    topics: Mutex<HashMap<Topic, TopicState>>,
    next_stream_id: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU64::new(1),
        }
    }

    /// Appends `msg` to the chosen priority queue and to the log, evicting the oldest log
    /// entry once the bound is exceeded (invariant 2).
    pub fn enqueue(&self, topic: &str, msg: Message, priority: Priority) {
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        match priority {
            Priority::High => state.pending_high.push_back(msg.clone()),
            Priority::Low => state.pending_low.push_back(msg.clone()),
        }
        state.log.push_back(msg);
        while state.log.len() > LOG_BOUND {
            state.log.pop_front();
        }
    }

    /// Atomically returns `pending_high` concatenated with `pending_low` and empties both
    /// (invariant 1: a publish call's drain is synchronous with acceptance).
    pub fn drain(&self, topic: &str) -> Vec<Message> {
        let mut topics = self.topics.lock();
        let Some(state) = topics.get_mut(topic) else {
            return Vec::new();
        };
        let mut out: Vec<Message> = state.pending_high.drain(..).collect();
        out.extend(state.pending_low.drain(..));
        out
    }

    /// Registers a fresh per-connection delivery queue for `topic` and returns its id and
    /// receiving half. The stream handler owns the receiver; the store keeps only the
    /// sender, so fan-out is non-blocking and independent per stream.
    pub fn attach_stream(&self, topic: &str) -> (StreamId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        state.stream_queues.insert(id, tx);
        (id, rx)
    }

    pub fn detach_stream(&self, topic: &str, id: StreamId) {
        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(topic) {
            state.stream_queues.remove(&id);
        }
    }

    /// Snapshot of the currently live stream senders for `topic`, used by the fan-out
    /// engine to dispatch a drained batch. Cloning the senders is cheap (an `mpsc` sender
    /// is a handle) and lets the push happen outside the store's lock.
    pub fn stream_senders(&self, topic: &str) -> Vec<(StreamId, mpsc::UnboundedSender<String>)> {
        let topics = self.topics.lock();
        topics
            .get(topic)
            .map(|state| {
                state
                    .stream_queues
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_subscriber(&self, topic: &str, addr: impl Into<String>) {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_default()
            .add_subscriber(addr.into());
    }

    pub fn remove_subscriber(&self, topic: &str, addr: &str) {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_default()
            .remove_subscriber(addr);
    }

    /// Copy of the accepted-message log for `topic`, at most `LOG_BOUND` entries.
    pub fn snapshot_log(&self, topic: &str) -> Vec<Message> {
        let topics = self.topics.lock();
        topics
            .get(topic)
            .map(|state| state.log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Adds a webhook subscription, deduplicated per topic. Returns `true` if it was newly
    /// inserted.
    pub fn add_webhook(&self, topic: &str, url: impl Into<String>) -> bool {
        let url = url.into();
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        if state.webhooks.contains(&url) {
            false
        } else {
            state.webhooks.push(url);
            true
        }
    }

    /// Removes a webhook subscription. Returns `true` if it was present.
    pub fn remove_webhook(&self, topic: &str, url: &str) -> bool {
        let mut topics = self.topics.lock();
        let Some(state) = topics.get_mut(topic) else {
            return false;
        };
        let before = state.webhooks.len();
        state.webhooks.retain(|u| u != url);
        state.webhooks.len() != before
    }

    /// Builds the outbound gossip payload: for every topic, the locally-observed live
    /// subscribers minus anything pending unsubscribe, and the non-empty unsubscribe sets.
    pub fn gossip_snapshot(&self) -> GossipPayload {
        let topics = self.topics.lock();
        let mut payload = GossipPayload::default();
        for (topic, state) in topics.iter() {
            let live: Vec<String> = state
                .sse_subscribers
                .difference(&state.sse_unsubscribed)
                .cloned()
                .collect();
            payload.sse_subscribers.insert(topic.clone(), live);
            if !state.sse_unsubscribed.is_empty() {
                payload
                    .unsubscribed
                    .insert(topic.clone(), state.sse_unsubscribed.iter().cloned().collect());
            }
        }
        payload
    }

    /// Merges an inbound gossip payload: subscribers are applied first, then unsubscribes,
    /// so that "unsubscribed wins over subscribed" within a single round (§4.3).
    pub fn apply_gossip(&self, payload: &GossipPayload) {
        let mut topics = self.topics.lock();
        for (topic, addrs) in &payload.sse_subscribers {
            let state = topics.entry(topic.clone()).or_default();
            for addr in addrs {
                state.sse_unsubscribed.remove(addr);
                state.sse_subscribers.insert(addr.clone());
            }
        }
        for (topic, addrs) in &payload.unsubscribed {
            let state = topics.entry(topic.clone()).or_default();
            for addr in addrs {
                state.sse_subscribers.remove(addr);
                state.sse_unsubscribed.insert(addr.clone());
            }
        }
    }

    /// Clears every topic's `sse_unsubscribed` set after a gossip round has been attempted
    /// against every peer (§4.3: "after a round completes... the sender clears its local
    /// `sseUnsubscribed` sets").
    pub fn clear_unsubscribed(&self) {
        let mut topics = self.topics.lock();
        for state in topics.values_mut() {
            state.sse_unsubscribed.clear();
        }
    }

    #[cfg(test)]
    fn subscribers(&self, topic: &str) -> HashSet<String> {
        self.topics
            .lock()
            .get(topic)
            .map(|s| s.sse_subscribers.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn unsubscribed(&self, topic: &str) -> HashSet<String> {
        self.topics
            .lock()
            .get(topic)
            .map(|s| s.sse_unsubscribed.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(topic: &str, priority: &str) -> Message {
        Message::new(json!({"topic": topic, "priority": priority, "data": {}}))
    }

    #[test]
    fn drain_empties_both_queues_high_before_low() {
        let store = Store::new();
        store.enqueue("t", msg("t", "low"), Priority::Low);
        store.enqueue("t", msg("t", "high"), Priority::High);
        let drained = store.drain("t");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].priority(), Priority::High);
        assert_eq!(drained[1].priority(), Priority::Low);
        assert!(store.drain("t").is_empty());
    }

    #[test]
    fn log_bound_is_fifo() {
        let store = Store::new();
        for i in 0..1050 {
            store.enqueue("y", Message::new(json!({"topic": "y", "seq": i})), Priority::Low);
        }
        let log = store.snapshot_log("y");
        assert_eq!(log.len(), LOG_BOUND);
        assert_eq!(log[0].value()["seq"], 50);
        assert_eq!(log[999].value()["seq"], 1049);
    }

    #[test]
    fn subscriber_and_unsubscribed_are_mutually_exclusive() {
        let store = Store::new();
        store.add_subscriber("z", "1.2.3.4");
        assert!(store.subscribers("z").contains("1.2.3.4"));
        assert!(!store.unsubscribed("z").contains("1.2.3.4"));

        store.remove_subscriber("z", "1.2.3.4");
        assert!(!store.subscribers("z").contains("1.2.3.4"));
        assert!(store.unsubscribed("z").contains("1.2.3.4"));

        store.add_subscriber("z", "1.2.3.4");
        assert!(store.subscribers("z").contains("1.2.3.4"));
        assert!(!store.unsubscribed("z").contains("1.2.3.4"));
    }

    #[test]
    fn webhook_subscribe_is_idempotent() {
        let store = Store::new();
        assert!(store.add_webhook("t", "http://example.com/hook"));
        assert!(!store.add_webhook("t", "http://example.com/hook"));
    }

    #[test]
    fn unsubscribing_unknown_webhook_is_a_no_op() {
        let store = Store::new();
        assert!(!store.remove_webhook("t", "http://nope"));
    }

    #[test]
    fn gossip_snapshot_excludes_pending_unsubscribes() {
        let store = Store::new();
        store.add_subscriber("t", "a");
        store.add_subscriber("t", "b");
        store.remove_subscriber("t", "b");
        let snap = store.gossip_snapshot();
        let live = &snap.sse_subscribers["t"];
        assert!(live.contains(&"a".to_string()));
        assert!(!live.contains(&"b".to_string()));
        assert_eq!(snap.unsubscribed["t"], vec!["b".to_string()]);
    }

    #[test]
    fn apply_gossip_merges_and_unsubscribe_wins_within_round() {
        let store = Store::new();
        let mut payload = GossipPayload::default();
        payload
            .sse_subscribers
            .insert("t".into(), vec!["a".into(), "b".into()]);
        payload.unsubscribed.insert("t".into(), vec!["b".into()]);
        store.apply_gossip(&payload);
        assert!(store.subscribers("t").contains("a"));
        assert!(!store.subscribers("t").contains("b"));
        assert!(store.unsubscribed("t").contains("b"));
    }

    #[tokio::test]
    async fn attach_and_detach_stream_round_trip() {
        let store = Store::new();
        let (id, mut rx) = store.attach_stream("t");
        assert_eq!(store.stream_senders("t").len(), 1);
        for (_, tx) in store.stream_senders("t") {
            tx.send("hello".to_string()).unwrap();
        }
        assert_eq!(rx.recv().await.unwrap(), "hello");
        store.detach_stream("t", id);
        assert!(store.stream_senders("t").is_empty());
    }
}
