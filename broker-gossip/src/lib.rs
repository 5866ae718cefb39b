//! Gossip Module (C3): periodic bi-directional exchange of subscriber soft state so that
//! whichever peer is promoted to leader can resume fan-out with a correct view of who is
//! listening. No vector clock, no consensus: membership is advisory, cheap to reconstruct,
//! and losing a round is tolerable (spec.md §4.3, §9).

use broker_registry::PeerRegistry;
use broker_rpc::RpcError;
use broker_store::Store;
use broker_types::{GossipPayload, PeerAddress};
use parking_lot::Mutex;
use slog::{debug, o, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const GOSSIP_PERIOD: Duration = Duration::from_secs(10);

/// Number of consecutive failed rounds to a peer before escalating the log level, grounding
/// spec.md §9's "Gossip Module MAY prune an address on repeated transport failure" as a
/// log-level escalation rather than a registry mutation (decision recorded in DESIGN.md:
/// the registry stays immutable, since pruning a statically-configured peer would
/// contradict the "no dynamic cluster membership" non-goal).
pub const FAILURE_STREAK_WARN_THRESHOLD: u32 = 3;

pub trait GossipTransport: Send + Sync + 'static {
    fn send_gossip(
        &self,
        addr: &PeerAddress,
        payload: &GossipPayload,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;
}

impl GossipTransport for broker_rpc::RpcClient {
    fn send_gossip(
        &self,
        addr: &PeerAddress,
        payload: &GossipPayload,
    ) -> impl Future<Output = Result<(), RpcError>> + Send {
        broker_rpc::RpcClient::send_gossip(self, addr, payload)
    }
}

/// Merges an inbound `/gossip` payload into the local store. Subscribers are applied
/// before unsubscribes so that, within one round, "unsubscribed wins over subscribed"
/// (spec.md §4.3).
pub fn receive_gossip(store: &Store, payload: &GossipPayload) {
    store.apply_gossip(payload);
}

pub struct GossipLoop<T: GossipTransport = broker_rpc::RpcClient> {
    store: Arc<Store>,
    registry: Arc<PeerRegistry>,
    rpc: Arc<T>,
    log: slog::Logger,
    failure_streaks: Mutex<HashMap<broker_types::BrokerId, u32>>,
}

impl<T: GossipTransport> GossipLoop<T> {
    pub fn new(store: Arc<Store>, registry: Arc<PeerRegistry>, rpc: Arc<T>, log: slog::Logger) -> Self {
        Self {
            store,
            registry,
            rpc,
            log: log.new(o!("module" => "gossip")),
            failure_streaks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one gossip round: snapshot local state, POST it to every peer, then clear the
    /// unsubscribed sets regardless of per-peer outcome (§4.3: "after a round completes").
    pub async fn run_round(&self) {
        let peers = self.registry.peers();
        if peers.is_empty() {
            return;
        }

        let payload = self.store.gossip_snapshot();
        if payload.is_empty() {
            debug!(self.log, "nothing to gossip this round");
        }

        for (peer_id, addr) in peers {
            match self.rpc.send_gossip(&addr, &payload).await {
                Ok(()) => {
                    self.failure_streaks.lock().remove(&peer_id);
                }
                Err(e) => {
                    let mut streaks = self.failure_streaks.lock();
                    let streak = streaks.entry(peer_id).or_insert(0);
                    *streak += 1;
                    if *streak >= FAILURE_STREAK_WARN_THRESHOLD {
                        warn!(self.log, "gossip repeatedly failing to reach peer";
                            "peer_id" => peer_id, "consecutive_failures" => *streak, "error" => %e);
                    } else {
                        debug!(self.log, "gossip round lost for peer"; "peer_id" => peer_id, "error" => %e);
                    }
                }
            }
        }

        self.store.clear_unsubscribed();
    }

    /// Background task: runs `run_round` every 10s for the process lifetime.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::time::sleep(GOSSIP_PERIOD).await;
            self.run_round().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::BrokerId;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        fail_for: HashSet<BrokerId>,
        registry_by_addr: HashMap<String, BrokerId>,
        sent: StdMutex<Vec<(BrokerId, GossipPayload)>>,
    }

    impl GossipTransport for FakeTransport {
        async fn send_gossip(&self, addr: &PeerAddress, payload: &GossipPayload) -> Result<(), RpcError> {
            let id = self.registry_by_addr[&addr.to_string()];
            self.sent.lock().unwrap().push((id, payload.clone()));
            if self.fail_for.contains(&id) {
                Err(RpcError::Timeout(addr.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn registry(self_id: BrokerId) -> Arc<PeerRegistry> {
        let table = vec![
            (1, PeerAddress::new("h1", 1)),
            (2, PeerAddress::new("h2", 2)),
        ];
        Arc::new(PeerRegistry::new(self_id, table))
    }

    #[tokio::test]
    async fn round_clears_unsubscribed_after_attempting_every_peer() {
        let store = Arc::new(Store::new());
        store.add_subscriber("t", "1.1.1.1");
        store.remove_subscriber("t", "1.1.1.1");

        let mut transport = FakeTransport::default();
        transport.registry_by_addr.insert("h2:2".into(), 2);
        let gossip = GossipLoop::new(store.clone(), registry(1), Arc::new(transport), broker_logging::test_logger());

        gossip.run_round().await;
        let snap = store.gossip_snapshot();
        assert!(snap.unsubscribed.get("t").map(|v| v.is_empty()).unwrap_or(true));
    }

    #[tokio::test]
    async fn a_failed_peer_does_not_block_the_round() {
        let store = Arc::new(Store::new());
        let mut transport = FakeTransport::default();
        transport.registry_by_addr.insert("h2:2".into(), 2);
        transport.fail_for.insert(2);
        let gossip = GossipLoop::new(store, registry(1), Arc::new(transport), broker_logging::test_logger());

        // Should not panic or hang even though the only peer fails.
        gossip.run_round().await;
        assert_eq!(*gossip.failure_streaks.lock().get(&2).unwrap(), 1);
    }

    #[tokio::test]
    async fn receive_merges_into_store() {
        let store = Store::new();
        let mut payload = GossipPayload::default();
        payload.sse_subscribers.insert("t".into(), vec!["a".into()]);
        receive_gossip(&store, &payload);
        let snap = store.gossip_snapshot();
        assert_eq!(snap.sse_subscribers["t"], vec!["a".to_string()]);
    }
}
