//! Group membership as seen by the sync engine: the consensus and
//! observer lists, the connected peers, and whether the local node
//! belongs to the group at all.

use parking_lot::RwLock;
use shared_types::NodeId;
use std::collections::HashSet;

/// Node lists the engine selects peers from. Readers get copies so no
/// list lock is held across sends.
pub struct Membership {
    node_id: NodeId,
    consensus: RwLock<Vec<NodeId>>,
    observers: RwLock<Vec<NodeId>>,
    connected: RwLock<HashSet<NodeId>>,
    group: RwLock<HashSet<NodeId>>,
}

impl Membership {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            consensus: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            connected: RwLock::new(HashSet::new()),
            group: RwLock::new(HashSet::new()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Ordered consensus list; peer selection walks it in this order.
    pub fn consensus_node_list(&self) -> Vec<NodeId> {
        self.consensus.read().clone()
    }

    pub fn observer_node_list(&self) -> Vec<NodeId> {
        self.observers.read().clone()
    }

    pub fn connected_nodes(&self) -> HashSet<NodeId> {
        self.connected.read().clone()
    }

    pub fn set_consensus_node_list(&self, nodes: Vec<NodeId>) {
        *self.consensus.write() = nodes;
        self.update_group();
    }

    pub fn set_observer_node_list(&self, nodes: Vec<NodeId>) {
        *self.observers.write() = nodes;
        self.update_group();
    }

    pub fn set_connected_nodes(&self, nodes: HashSet<NodeId>) {
        *self.connected.write() = nodes;
    }

    /// Whether the local node is in the consensus or observer set.
    pub fn in_group(&self) -> bool {
        self.group.read().contains(&self.node_id)
    }

    fn update_group(&self) {
        let mut group: HashSet<NodeId> = self.consensus.read().iter().copied().collect();
        group.extend(self.observers.read().iter().copied());
        *self.group.write() = group;
    }
}
