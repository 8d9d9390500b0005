use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use forknet_config::{
    nodes::{NodePorts, create_node_config},
    timeouts,
    topology::{ConfigurationError, NetworkId, NodeId, NodeRole, TopologyDescription, TopologyPlan},
};
use forknet_env as tf_env;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    network::{NetworkTopology, Networks},
    readiness::{PeerExpectation, PeerReadiness, ReadinessCheck as _, ReadinessError},
    registry::WitnessRegistry,
};
use crate::nodes::{CommunicationError, NodeHandle, NodeLauncher, common::node::SpawnNodeError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("no free ports left for {node}")]
    PortAllocation { node: NodeId },
    #[error("failed to start {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: SpawnNodeError,
    },
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error("{node}: {source}")]
    Communication {
        node: NodeId,
        #[source]
        source: CommunicationError,
    },
    #[error("unknown network {0}")]
    UnknownNetwork(NetworkId),
    #[error("cannot connect {0} to itself")]
    SameNetwork(NetworkId),
    #[error("{node} has no known p2p id; run the networks first")]
    PeerIdUnknown { node: NodeId },
}

/// Builds sub-networks from a description, starts them and toggles the links
/// between them.
pub struct NetworkOrchestrator {
    launcher: Arc<dyn NodeLauncher>,
    init_private_key: Option<String>,
}

impl NetworkOrchestrator {
    /// Uses `FORKNET_INIT_PRIVATE_KEY` for the init witness when set.
    #[must_use]
    pub fn new(launcher: Arc<dyn NodeLauncher>) -> Self {
        Self {
            launcher,
            init_private_key: tf_env::forknet_init_private_key(),
        }
    }

    #[must_use]
    pub fn with_init_private_key(mut self, key: Option<String>) -> Self {
        self.init_private_key = key;
        self
    }

    #[must_use]
    pub fn launcher(&self) -> &Arc<dyn NodeLauncher> {
        &self.launcher
    }

    /// Lays out nodes, allocates ports and renders every node config. Nothing
    /// is started.
    pub fn build(&self, description: &TopologyDescription) -> Result<Networks, OrchestratorError> {
        let plan = TopologyPlan::from_description(description, self.init_private_key.as_deref())?;

        let mut taken = BTreeSet::new();
        let mut ports: BTreeMap<NodeId, NodePorts> = BTreeMap::new();
        for node in plan.networks.iter().flat_map(|network| network.nodes.iter()) {
            let allocated = self
                .launcher
                .allocate_ports(node.id, &mut taken)
                .ok_or(OrchestratorError::PortAllocation { node: node.id })?;
            ports.insert(node.id, allocated);
        }

        let connected = |a: NetworkId, b: NetworkId| {
            a == b || plan.connections.contains(&(a, b)) || plan.connections.contains(&(b, a))
        };

        let mut topologies = Vec::with_capacity(plan.networks.len());
        for network in &plan.networks {
            let mut nodes = Vec::with_capacity(network.nodes.len());
            for node in &network.nodes {
                let seeds = plan
                    .networks
                    .iter()
                    .filter(|other| connected(network.id, other.id))
                    .flat_map(|other| other.nodes.iter())
                    .filter(|peer| peer.id != node.id)
                    .filter_map(|peer| ports.get(&peer.id))
                    .map(NodePorts::p2p_endpoint)
                    .collect();
                let own_ports = ports
                    .get(&node.id)
                    .copied()
                    .ok_or(OrchestratorError::PortAllocation { node: node.id })?;
                let config = create_node_config(node, own_ports, seeds);
                debug!(node = %node.id, p2p = own_ports.p2p, http = own_ports.http, "configured node");
                nodes.push(NodeHandle::new(
                    node.id,
                    config,
                    node.witnesses.clone(),
                    Arc::clone(&self.launcher),
                ));
            }
            topologies.push(NetworkTopology::new(network.id, nodes));
        }

        info!(
            networks = topologies.len(),
            nodes = ports.len(),
            connections = plan.connections.len(),
            "built networks"
        );
        Ok(Networks::new(
            topologies,
            plan.connections.clone(),
            WitnessRegistry::from_plan(&plan),
        ))
    }

    /// Starts every stopped node. Processes spawn concurrently; init nodes
    /// must answer RPC before the others are awaited. Then pins each node's
    /// peers to its own and connected networks and waits for p2p links.
    pub async fn run(
        &self,
        networks: &mut Networks,
        environment_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<(), OrchestratorError> {
        if let Some(env) = environment_overrides {
            for node in networks.nodes_mut() {
                node.set_environment(env.clone());
            }
        }

        let starting = networks
            .nodes_mut()
            .filter_map(|node| (!node.is_running()).then_some(node))
            .map(|node| async move {
                let id = node.id();
                node.spawn()
                    .await
                    .map_err(|source| OrchestratorError::Spawn { node: id, source })
            });
        let started = try_join_all(starting).await?.len();
        if started == 0 {
            debug!("every node already running");
            return Ok(());
        }
        info!(started, "spawned node processes");

        Self::wait_live(networks, |role| role == NodeRole::Init).await?;
        Self::wait_live(networks, |role| role != NodeRole::Init).await?;

        try_join_all(networks.nodes_mut().map(|node| async move {
            let id = node.id();
            node.refresh_peer_id()
                .await
                .map(drop)
                .map_err(|source| OrchestratorError::Communication { node: id, source })
        }))
        .await?;

        let all = networks
            .topologies()
            .iter()
            .map(NetworkTopology::id)
            .collect::<BTreeSet<_>>();
        Self::pin_allowed_peers(networks, &all).await?;
        Self::wait_for_peers(networks).await?;

        info!(networks = networks.len(), "networks running");
        Ok(())
    }

    /// Links `a` and `b`. No-op when they are already connected.
    pub async fn connect_sub_networks(
        &self,
        networks: &mut Networks,
        a: NetworkId,
        b: NetworkId,
    ) -> Result<(), OrchestratorError> {
        Self::check_pair(networks, a, b)?;
        if !networks.link(a, b) {
            debug!(%a, %b, "networks already connected");
            return Ok(());
        }

        info!(%a, %b, "connecting networks");
        if let Err(err) = Self::pin_allowed_peers(networks, &BTreeSet::from([a, b])).await {
            networks.unlink(a, b);
            return Err(err);
        }

        let (Some(left), Some(right)) = (networks.get(a), networks.get(b)) else {
            return Err(OrchestratorError::UnknownNetwork(a));
        };
        let dials = left.nodes().iter().flat_map(|from| {
            right.nodes().iter().map(move |to| async move {
                from.api()
                    .add_node(to.config().ports.p2p_endpoint())
                    .await
                    .map_err(|source| OrchestratorError::Communication {
                        node: from.id(),
                        source,
                    })
            })
        });
        try_join_all(dials).await?;
        Ok(())
    }

    /// Cuts the direct link between `a` and `b`. No-op when they are not
    /// connected. Nodes of `a` and `b` stop peering with each other, but a
    /// third network still connected to both keeps relaying blocks between
    /// them; disconnect it too to isolate the pair.
    pub async fn disconnect_sub_networks(
        &self,
        networks: &mut Networks,
        a: NetworkId,
        b: NetworkId,
    ) -> Result<(), OrchestratorError> {
        Self::check_pair(networks, a, b)?;
        if !networks.unlink(a, b) {
            debug!(%a, %b, "networks already disconnected");
            return Ok(());
        }

        info!(%a, %b, "disconnecting networks");
        if let Err(err) = Self::pin_allowed_peers(networks, &BTreeSet::from([a, b])).await {
            networks.link(a, b);
            return Err(err);
        }
        if networks.bridged(a, b) {
            warn!(
                %a,
                %b,
                "networks still share blocks through another connected network"
            );
        }
        Ok(())
    }

    fn check_pair(networks: &Networks, a: NetworkId, b: NetworkId) -> Result<(), OrchestratorError> {
        for id in [a, b] {
            if networks.get(id).is_none() {
                return Err(OrchestratorError::UnknownNetwork(id));
            }
        }
        if a == b {
            return Err(OrchestratorError::SameNetwork(a));
        }
        Ok(())
    }

    async fn wait_live(
        networks: &Networks,
        select: impl Fn(NodeRole) -> bool,
    ) -> Result<(), OrchestratorError> {
        let timeout = timeouts::node_startup_timeout();
        let waits = networks
            .nodes()
            .filter(|node| select(node.id().role))
            .map(|node| async move {
                node.wait_live(timeout)
                    .await
                    .map_err(|source| OrchestratorError::Spawn {
                        node: node.id(),
                        source,
                    })
            });
        try_join_all(waits).await.map(drop)
    }

    async fn pin_allowed_peers(
        networks: &Networks,
        targets: &BTreeSet<NetworkId>,
    ) -> Result<(), OrchestratorError> {
        let mut calls = Vec::new();
        for network in targets {
            let allowed = networks
                .allowed_peers_for(*network)
                .map_err(|node| OrchestratorError::PeerIdUnknown { node })?;
            let Some(topology) = networks.get(*network) else {
                return Err(OrchestratorError::UnknownNetwork(*network));
            };
            for node in topology.nodes() {
                let allowed = allowed.clone();
                calls.push(async move {
                    node.api()
                        .set_allowed_peers(&allowed)
                        .await
                        .map_err(|source| OrchestratorError::Communication {
                            node: node.id(),
                            source,
                        })
                });
            }
        }
        debug!(nodes = calls.len(), networks = ?targets, "pinning allowed peers");
        try_join_all(calls).await.map(drop)
    }

    async fn wait_for_peers(networks: &Networks) -> Result<(), OrchestratorError> {
        PeerReadiness::new(peer_expectations(networks)).wait().await?;
        Ok(())
    }
}

/// Every node should see all other nodes of its own and directly connected
/// networks.
fn peer_expectations(networks: &Networks) -> Vec<PeerExpectation<'_>> {
    networks
        .topologies()
        .iter()
        .flat_map(|topology| {
            let reachable: usize = networks
                .reachable_from(topology.id())
                .into_iter()
                .filter_map(|id| networks.get(id))
                .map(|other| other.nodes().len())
                .sum();
            topology.nodes().iter().map(move |node| PeerExpectation {
                label: node.label(),
                api: node.api(),
                min_peers: reachable.saturating_sub(1),
            })
        })
        .collect()
}
