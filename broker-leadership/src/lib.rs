//! Leadership Module (C2): Bully-style leader election, leader health monitoring and
//! leader announcement propagation.
//!
//! State machine per broker: `Follower` -> (leader unreachable | startup delay elapsed) ->
//! `Electing` -> (higher peer answers OK and announces) -> `Follower`, or (no OK, or
//! timeout waiting for the announcement) -> `Leader`. `Leader` -> (receives an announcement
//! for a different id) -> `Follower`.

use broker_registry::PeerRegistry;
use broker_rpc::RpcError;
use broker_types::{BrokerId, ElectionVerdict, PeerAddress};
use parking_lot::Mutex;
use slog::{info, o, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

pub const ELECTION_RPC_TIMEOUT: Duration = Duration::from_secs(2);
pub const ELECTION_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
pub const ANNOUNCEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const ANNOUNCEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const LEADER_ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(2);
pub const HEALTH_PROBE_PERIOD: Duration = Duration::from_secs(5);
pub const STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Outbound RPCs the leadership module needs. Abstracted behind a trait so the election
/// and health-monitor state machines can be exercised against a fake transport in tests,
/// the way the teacher's `network` sync-manager tests drive state machines directly with
/// constructed messages rather than real peers.
pub trait Transport: Send + Sync + 'static {
    fn send_election(
        &self,
        addr: &PeerAddress,
        self_id: BrokerId,
    ) -> impl Future<Output = Result<ElectionVerdict, RpcError>> + Send;

    fn announce_leader(
        &self,
        addr: &PeerAddress,
        leader_id: BrokerId,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;

    fn ping(&self, addr: &PeerAddress) -> impl Future<Output = Result<(), RpcError>> + Send;
}

impl Transport for broker_rpc::RpcClient {
    fn send_election(
        &self,
        addr: &PeerAddress,
        self_id: BrokerId,
    ) -> impl Future<Output = Result<ElectionVerdict, RpcError>> + Send {
        broker_rpc::RpcClient::send_election(self, addr, self_id)
    }

    fn announce_leader(
        &self,
        addr: &PeerAddress,
        leader_id: BrokerId,
    ) -> impl Future<Output = Result<(), RpcError>> + Send {
        broker_rpc::RpcClient::announce_leader(self, addr, leader_id)
    }

    fn ping(&self, addr: &PeerAddress) -> impl Future<Output = Result<(), RpcError>> + Send {
        broker_rpc::RpcClient::ping(self, addr)
    }
}

pub struct Leadership<T: Transport = broker_rpc::RpcClient> {
    registry: Arc<PeerRegistry>,
    rpc: Arc<T>,
    log: slog::Logger,
    current_leader: Mutex<Option<BrokerId>>,
    election_in_progress: Mutex<bool>,
    on_leader_update: Box<dyn Fn(BrokerId) + Send + Sync>,
}

impl<T: Transport> Leadership<T> {
    pub fn new(
        registry: Arc<PeerRegistry>,
        rpc: Arc<T>,
        log: slog::Logger,
        on_leader_update: impl Fn(BrokerId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry,
            rpc,
            log: log.new(o!("module" => "leadership")),
            current_leader: Mutex::new(None),
            election_in_progress: Mutex::new(false),
            on_leader_update: Box::new(on_leader_update),
        }
    }

    pub fn current_leader(&self) -> Option<BrokerId> {
        *self.current_leader.lock()
    }

    /// `POST /election` responder. Does not itself start an election on receiving a
    /// challenge from a lower-id peer, a deliberate simplification from textbook Bully
    /// kept per spec.md §4.2's explicit guidance (see DESIGN.md).
    pub fn on_election_message(&self, sender_id: BrokerId) -> ElectionVerdict {
        if self.registry.self_id() > sender_id {
            ElectionVerdict::Ok
        } else {
            ElectionVerdict::No
        }
    }

    /// `POST /leader` handler. Unconditionally adopts the announced id: no version number,
    /// last write wins.
    pub fn on_leader_announcement(&self, leader_id: BrokerId) {
        {
            let mut leader = self.current_leader.lock();
            *leader = Some(leader_id);
            *self.election_in_progress.lock() = false;
        }
        info!(self.log, "adopted announced leader"; "leader_id" => leader_id);
        (self.on_leader_update)(leader_id);
    }

    /// Initiates an election from this broker. Idempotent: a no-op if one is already in
    /// progress locally.
    pub async fn start_election(self: &Arc<Self>) {
        {
            let mut in_progress = self.election_in_progress.lock();
            if *in_progress {
                return;
            }
            *in_progress = true;
            // Starting an election ends the "leader-known" state (invariant 5: exactly one
            // of election-in-progress / leader-known / no-leader holds at a time) until a
            // new leader is announced or this broker self-announces.
            *self.current_leader.lock() = None;
        }

        let self_id = self.registry.self_id();
        info!(self.log, "starting election"; "broker_id" => self_id);

        let higher_peers: Vec<(BrokerId, PeerAddress)> = self
            .registry
            .peers()
            .into_iter()
            .filter(|(id, _)| *id > self_id)
            .collect();

        if higher_peers.is_empty() {
            self.announce_self().await;
            return;
        }

        let challenges = higher_peers.iter().map(|(id, addr)| {
            let rpc = self.rpc.clone();
            let addr = addr.clone();
            let id = *id;
            async move { (id, rpc.send_election(&addr, self_id).await) }
        });

        let results = match timeout(ELECTION_JOIN_TIMEOUT, futures::future::join_all(challenges)).await {
            Ok(results) => results,
            Err(_) => Vec::new(),
        };

        let any_ok = results
            .iter()
            .any(|(_, r)| matches!(r, Ok(ElectionVerdict::Ok)));

        if !any_ok {
            self.announce_self().await;
            return;
        }

        info!(self.log, "higher peer alive, waiting for leader announcement");
        let deadline = Instant::now() + ANNOUNCEMENT_WAIT_TIMEOUT;
        loop {
            if self.current_leader().is_some() {
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(ANNOUNCEMENT_POLL_INTERVAL).await;
        }

        warn!(self.log, "timed out waiting for leader announcement, announcing self");
        self.announce_self().await;
    }

    async fn announce_self(self: &Arc<Self>) {
        let self_id = self.registry.self_id();
        {
            *self.current_leader.lock() = Some(self_id);
            *self.election_in_progress.lock() = false;
        }
        info!(self.log, "announcing self as leader"; "broker_id" => self_id);

        for (peer_id, addr) in self.registry.peers() {
            if let Err(e) = self.rpc.announce_leader(&addr, self_id).await {
                warn!(self.log, "leader announcement failed"; "peer_id" => peer_id, "error" => %e);
            }
        }

        (self.on_leader_update)(self_id);
    }

    /// Background task: every 5s, checks the current leader's liveness and starts a new
    /// election if it is unreachable. Runs for the process lifetime.
    pub async fn health_monitor_loop(self: Arc<Self>) {
        loop {
            sleep(HEALTH_PROBE_PERIOD).await;
            let self_id = self.registry.self_id();
            let Some(leader_id) = self.current_leader() else {
                continue;
            };
            if leader_id == self_id {
                continue;
            }
            let Some(addr) = self.registry.address_of(leader_id) else {
                continue;
            };
            if let Err(e) = self.rpc.ping(&addr).await {
                warn!(self.log, "leader unreachable, starting election";
                    "leader_id" => leader_id, "error" => %e);
                self.start_election().await;
            }
        }
    }

    /// Staggers cold-start elections: waits a fixed grace period, then starts one.
    pub async fn run_startup_election(self: Arc<Self>) {
        sleep(STARTUP_GRACE_PERIOD).await;
        self.start_election().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::PeerAddress;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        /// peer id -> verdict to return for send_election
        election_verdicts: HashMap<BrokerId, ElectionVerdict>,
        announce_calls: StdMutex<Vec<BrokerId>>,
        ping_failures: std::collections::HashSet<BrokerId>,
        registry_by_addr: HashMap<String, BrokerId>,
    }

    impl Transport for FakeTransport {
        async fn send_election(
            &self,
            addr: &PeerAddress,
            _self_id: BrokerId,
        ) -> Result<ElectionVerdict, RpcError> {
            let id = self.registry_by_addr[&addr.to_string()];
            Ok(*self.election_verdicts.get(&id).unwrap_or(&ElectionVerdict::No))
        }

        async fn announce_leader(&self, addr: &PeerAddress, leader_id: BrokerId) -> Result<(), RpcError> {
            let _ = addr;
            self.announce_calls.lock().unwrap().push(leader_id);
            Ok(())
        }

        async fn ping(&self, addr: &PeerAddress) -> Result<(), RpcError> {
            let id = self.registry_by_addr[&addr.to_string()];
            if self.ping_failures.contains(&id) {
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
            (3, PeerAddress::new("h3", 3)),
        ];
        Arc::new(PeerRegistry::new(self_id, table))
    }

    #[tokio::test]
    async fn self_announces_when_no_higher_peers() {
        let reg = registry(3);
        let transport = Arc::new(FakeTransport::default());
        let notified = Arc::new(StdMutex::new(None));
        let notified_clone = notified.clone();
        let leadership = Arc::new(Leadership::new(reg, transport.clone(), broker_logging::test_logger(), move |id| {
            *notified_clone.lock().unwrap() = Some(id);
        }));

        leadership.start_election().await;
        assert_eq!(leadership.current_leader(), Some(3));
        assert_eq!(*notified.lock().unwrap(), Some(3));
        assert_eq!(*transport.announce_calls.lock().unwrap(), vec![3, 3]);
    }

    #[tokio::test]
    async fn self_announces_when_all_higher_peers_say_no() {
        let reg = registry(1);
        let mut transport = FakeTransport::default();
        transport.registry_by_addr.insert("h2:2".into(), 2);
        transport.registry_by_addr.insert("h3:3".into(), 3);
        transport.election_verdicts.insert(2, ElectionVerdict::No);
        transport.election_verdicts.insert(3, ElectionVerdict::No);
        let leadership = Arc::new(Leadership::new(
            reg,
            Arc::new(transport),
            broker_logging::test_logger(),
            |_| {},
        ));

        leadership.start_election().await;
        assert_eq!(leadership.current_leader(), Some(1));
    }

    #[tokio::test]
    async fn adopts_announced_leader() {
        let reg = registry(2);
        let transport = FakeTransport::default();
        let leadership = Arc::new(Leadership::new(
            reg,
            Arc::new(transport),
            broker_logging::test_logger(),
            |_| {},
        ));

        leadership.on_leader_announcement(3);
        assert_eq!(leadership.current_leader(), Some(3));

        // Re-announcing the same leader id is a no-op beyond re-setting the same value.
        leadership.on_leader_announcement(3);
        assert_eq!(leadership.current_leader(), Some(3));
    }

    #[tokio::test]
    async fn election_is_idempotent_while_in_progress() {
        let reg = registry(1);
        let transport = FakeTransport::default();
        let leadership = Arc::new(Leadership::new(
            reg,
            Arc::new(transport),
            broker_logging::test_logger(),
            |_| {},
        ));

        // Mark in-progress directly and confirm a concurrent start_election returns early
        // without touching current_leader (the idempotent guard, spec.md §4.2 step 1).
        *leadership.election_in_progress.lock() = true;
        leadership.start_election().await;
        assert_eq!(leadership.current_leader(), None);
    }

    #[test]
    fn responder_answers_ok_only_when_strictly_higher() {
        let reg = registry(5);
        let transport = FakeTransport::default();
        let leadership = Leadership::new(reg, Arc::new(transport), broker_logging::test_logger(), |_| {});
        assert_eq!(leadership.on_election_message(3), ElectionVerdict::Ok);
        assert_eq!(leadership.on_election_message(5), ElectionVerdict::No);
        assert_eq!(leadership.on_election_message(7), ElectionVerdict::No);
    }
}
