use std::collections::BTreeSet;

use forknet_config::topology::{NetworkId, NodeId, NodeRole, WitnessIdentity};
use futures::future::join_all;
use tracing::warn;

use super::{registry::WitnessRegistry, utils::ordered_pair};
use crate::nodes::{NodeHandle, common::node::SpawnNodeError};

/// Nodes of one sub-network, init node first, then witness nodes, then api
/// nodes.
pub struct NetworkTopology {
    id: NetworkId,
    nodes: Vec<NodeHandle>,
}

impl NetworkTopology {
    #[must_use]
    pub const fn new(id: NetworkId, nodes: Vec<NodeHandle>) -> Self {
        Self { id, nodes }
    }

    #[must_use]
    pub const fn id(&self) -> NetworkId {
        self.id
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [NodeHandle] {
        &mut self.nodes
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeHandle> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeHandle> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    fn with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.iter().filter(move |node| node.id().role == role)
    }

    #[must_use]
    pub fn init_node(&self) -> Option<&NodeHandle> {
        self.with_role(NodeRole::Init).next()
    }

    pub fn witness_nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.with_role(NodeRole::Witness)
    }

    pub fn api_nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.with_role(NodeRole::Api)
    }

    #[must_use]
    pub fn api_node(&self, index: usize) -> Option<&NodeHandle> {
        self.api_nodes().nth(index)
    }

    /// Node a wallet should attach to: the first api node, else the first
    /// node.
    #[must_use]
    pub fn wallet_node(&self) -> Option<&NodeHandle> {
        self.api_nodes().next().or_else(|| self.nodes.first())
    }

    pub fn witnesses(&self) -> impl Iterator<Item = &WitnessIdentity> {
        self.nodes.iter().flat_map(|node| node.witnesses().iter())
    }

    #[must_use]
    pub fn witness_names(&self) -> Vec<&str> {
        self.witnesses().map(WitnessIdentity::name).collect()
    }

    /// Stops every node of this network.
    pub async fn teardown(&mut self) -> Result<(), SpawnNodeError> {
        stop_nodes(self.nodes.iter_mut()).await
    }
}

async fn stop_nodes(
    nodes: impl Iterator<Item = &mut NodeHandle>,
) -> Result<(), SpawnNodeError> {
    let results = join_all(nodes.map(|node| node.stop())).await;
    let mut first = None;
    for result in results {
        if let Err(err) = result {
            warn!(error = %err, "failed to stop node");
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Every sub-network of one run plus the connected relation between them.
pub struct Networks {
    topologies: Vec<NetworkTopology>,
    connections: BTreeSet<(NetworkId, NetworkId)>,
    registry: WitnessRegistry,
}

impl Networks {
    #[must_use]
    pub fn new(
        topologies: Vec<NetworkTopology>,
        connections: BTreeSet<(NetworkId, NetworkId)>,
        registry: WitnessRegistry,
    ) -> Self {
        let connections = connections
            .into_iter()
            .map(|(a, b)| ordered_pair(a, b))
            .collect();
        Self {
            topologies,
            connections,
            registry,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topologies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topologies.is_empty()
    }

    #[must_use]
    pub fn topologies(&self) -> &[NetworkTopology] {
        &self.topologies
    }

    #[must_use]
    pub fn get(&self, id: NetworkId) -> Option<&NetworkTopology> {
        self.topologies.iter().find(|topology| topology.id() == id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut NetworkTopology> {
        self.topologies
            .iter_mut()
            .find(|topology| topology.id() == id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.topologies.iter().flat_map(|topology| topology.nodes())
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeHandle> {
        self.topologies
            .iter_mut()
            .flat_map(|topology| topology.nodes_mut().iter_mut())
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeHandle> {
        self.get(id.network)?.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeHandle> {
        self.get_mut(id.network)?.node_mut(id)
    }

    #[must_use]
    pub const fn registry(&self) -> &WitnessRegistry {
        &self.registry
    }

    /// Node that signs blocks for `witness`.
    #[must_use]
    pub fn owner_of(&self, witness: &str) -> Option<&NodeHandle> {
        self.node(self.registry.owner(witness)?)
    }

    #[must_use]
    pub fn are_connected(&self, a: NetworkId, b: NetworkId) -> bool {
        a == b || self.connections.contains(&ordered_pair(a, b))
    }

    #[must_use]
    pub const fn connections(&self) -> &BTreeSet<(NetworkId, NetworkId)> {
        &self.connections
    }

    /// Returns false when the pair was already linked.
    pub(crate) fn link(&mut self, a: NetworkId, b: NetworkId) -> bool {
        self.connections.insert(ordered_pair(a, b))
    }

    /// Returns false when the pair was not linked.
    pub(crate) fn unlink(&mut self, a: NetworkId, b: NetworkId) -> bool {
        self.connections.remove(&ordered_pair(a, b))
    }

    /// `network` itself plus every network directly connected to it.
    #[must_use]
    pub fn reachable_from(&self, network: NetworkId) -> BTreeSet<NetworkId> {
        self.topologies
            .iter()
            .map(NetworkTopology::id)
            .filter(|other| self.are_connected(network, *other))
            .collect()
    }

    /// Every network whose blocks can reach `network` over a chain of links.
    #[must_use]
    pub fn component_of(&self, network: NetworkId) -> BTreeSet<NetworkId> {
        let mut component = BTreeSet::from([network]);
        let mut pending = vec![network];
        while let Some(current) = pending.pop() {
            for next in self.reachable_from(current) {
                if component.insert(next) {
                    pending.push(next);
                }
            }
        }
        component
    }

    /// True when `a` and `b` still exchange blocks through other networks
    /// despite having no direct link.
    #[must_use]
    pub fn bridged(&self, a: NetworkId, b: NetworkId) -> bool {
        !self.are_connected(a, b) && self.component_of(a).contains(&b)
    }

    /// p2p ids of every node `network` may talk to: its own nodes and those
    /// of directly connected networks. Fails with the first node whose id is
    /// not known yet.
    pub fn allowed_peers_for(&self, network: NetworkId) -> Result<Vec<String>, NodeId> {
        self.reachable_from(network)
            .into_iter()
            .filter_map(|id| self.get(id))
            .flat_map(|topology| topology.nodes())
            .map(|node| node.peer_id().map(str::to_owned).ok_or(node.id()))
            .collect()
    }

    /// Stops every node. Keeps going after failures and returns the first.
    pub async fn stop_all(&mut self) -> Result<(), SpawnNodeError> {
        stop_nodes(self.nodes_mut()).await
    }
}
