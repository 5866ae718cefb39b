//! Peer Registry (C1): a static `{broker id -> address}` map, populated once at process
//! start and immutable afterwards. Every other component reads it through `&PeerRegistry`;
//! nothing mutates it at runtime (no dynamic cluster membership, per spec).

use broker_types::{BrokerId, PeerAddress};
use std::collections::HashMap;

/// Compiled-in peer table, matching the original broker's `get_known_peers`.
pub const DEFAULT_PEER_TABLE: &[(BrokerId, &str, u16)] =
    &[(1, "broker", 5001), (2, "broker2", 5001), (3, "broker3", 5001)];

#[derive(Debug, Clone)]
pub struct PeerRegistry {
    self_id: BrokerId,
    /// All configured peers, including self, in configuration order.
    table: Vec<(BrokerId, PeerAddress)>,
}

impl PeerRegistry {
    pub fn new(self_id: BrokerId, table: Vec<(BrokerId, PeerAddress)>) -> Self {
        Self { self_id, table }
    }

    /// Builds a registry from the compiled-in peer table (§6: `BROKER_ID` defaults to 1).
    pub fn from_default_table(self_id: BrokerId) -> Self {
        let table = DEFAULT_PEER_TABLE
            .iter()
            .map(|(id, host, port)| (*id, PeerAddress::new(*host, *port)))
            .collect();
        Self::new(self_id, table)
    }

    pub fn self_id(&self) -> BrokerId {
        self.self_id
    }

    /// All known peers, excluding self.
    pub fn peers(&self) -> HashMap<BrokerId, PeerAddress> {
        self.table
            .iter()
            .filter(|(id, _)| *id != self.self_id)
            .map(|(id, addr)| (*id, addr.clone()))
            .collect()
    }

    /// Resolves any configured broker id, including self, to its address.
    pub fn address_of(&self, id: BrokerId) -> Option<PeerAddress> {
        self.table
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, a)| a.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_self_from_peers() {
        let reg = PeerRegistry::from_default_table(2);
        let peers = reg.peers();
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains_key(&2));
        assert_eq!(peers.get(&1).unwrap().to_string(), "broker:5001");
        assert_eq!(peers.get(&3).unwrap().to_string(), "broker3:5001");
    }

    #[test]
    fn address_of_resolves_any_configured_id_including_self() {
        let reg = PeerRegistry::from_default_table(1);
        assert_eq!(reg.address_of(1).unwrap().to_string(), "broker:5001");
        assert_eq!(reg.address_of(3).unwrap().to_string(), "broker3:5001");
        assert!(reg.address_of(99).is_none());
    }

    #[test]
    fn custom_table_is_honored() {
        let table = vec![
            (10, PeerAddress::new("a", 1)),
            (20, PeerAddress::new("b", 2)),
        ];
        let reg = PeerRegistry::new(10, table);
        assert_eq!(reg.self_id(), 10);
        assert_eq!(reg.peers().len(), 1);
    }
}
