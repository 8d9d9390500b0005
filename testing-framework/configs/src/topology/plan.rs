use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    description::TopologyDescription,
    invariants::{ConfigurationError, initial_connections, validate_description},
    witness::{WitnessIdentity, secondary_init_name, witness_name},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub usize);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net{}", self.0)
    }
}

/// Role a node plays inside its network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Init,
    Witness,
    Api,
}

impl NodeRole {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Witness => "witness",
            Self::Api => "api",
        }
    }

    #[must_use]
    pub const fn produces_blocks(self) -> bool {
        matches!(self, Self::Init | Self::Witness)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub network: NetworkId,
    pub role: NodeRole,
    /// Zero-based index within the role group of the network.
    pub index: usize,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            NodeRole::Init => write!(f, "{}-init", self.network),
            role => write!(f, "{}-{}{}", self.network, role.label(), self.index),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePlan {
    pub id: NodeId,
    pub witnesses: Vec<WitnessIdentity>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkPlan {
    pub id: NetworkId,
    pub nodes: Vec<NodePlan>,
}

impl NetworkPlan {
    pub fn witnesses(&self) -> impl Iterator<Item = &WitnessIdentity> {
        self.nodes.iter().flat_map(|node| node.witnesses.iter())
    }

    pub fn init_node(&self) -> Option<&NodePlan> {
        self.nodes.iter().find(|node| node.id.role == NodeRole::Init)
    }
}

/// Deterministic node and witness layout derived from a description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyPlan {
    pub networks: Vec<NetworkPlan>,
    pub connections: BTreeSet<(NetworkId, NetworkId)>,
    pub owners: BTreeMap<String, NodeId>,
}

impl TopologyPlan {
    /// Validates the description and lays out nodes in declaration order:
    /// init node, witness nodes, api nodes. Witness indices run contiguously
    /// across the witness nodes of one network. The first init node carries
    /// the genesis witness; later ones get a per-network init witness.
    pub fn from_description(
        description: &TopologyDescription,
        init_private_key: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        validate_description(description)?;

        let mut networks = Vec::with_capacity(description.networks.len());
        let mut owners = BTreeMap::new();
        let mut genesis_assigned = false;

        for (network_idx, spec) in description.networks.iter().enumerate() {
            let network = NetworkId(network_idx);
            let mut nodes = Vec::new();

            if spec.init_node.count() == 1 {
                let init = if genesis_assigned {
                    WitnessIdentity::new(secondary_init_name(network_idx))?
                } else {
                    genesis_assigned = true;
                    WitnessIdentity::init(init_private_key)?
                };
                nodes.push(NodePlan {
                    id: NodeId {
                        network,
                        role: NodeRole::Init,
                        index: 0,
                    },
                    witnesses: vec![init],
                });
            }

            let mut next_witness = 0usize;
            for (node_idx, count) in spec.witness_nodes.iter().enumerate() {
                let witnesses = (next_witness..next_witness + *count as usize)
                    .map(|idx| WitnessIdentity::new(witness_name(network_idx, idx)))
                    .collect::<Result<Vec<_>, _>>()?;
                next_witness += *count as usize;
                nodes.push(NodePlan {
                    id: NodeId {
                        network,
                        role: NodeRole::Witness,
                        index: node_idx,
                    },
                    witnesses,
                });
            }

            for api_idx in 0..spec.api_node.count() as usize {
                nodes.push(NodePlan {
                    id: NodeId {
                        network,
                        role: NodeRole::Api,
                        index: api_idx,
                    },
                    witnesses: Vec::new(),
                });
            }

            for node in &nodes {
                for witness in &node.witnesses {
                    if owners.insert(witness.name().to_owned(), node.id).is_some() {
                        return Err(ConfigurationError::DuplicateWitness {
                            name: witness.name().to_owned(),
                        });
                    }
                }
            }

            debug!(
                %network,
                nodes = nodes.len(),
                witnesses = next_witness,
                "planned network"
            );
            networks.push(NetworkPlan { id: network, nodes });
        }

        let connections = initial_connections(description)
            .into_iter()
            .map(|(a, b)| (NetworkId(a), NetworkId(b)))
            .collect();

        Ok(Self {
            networks,
            connections,
            owners,
        })
    }

    #[must_use]
    pub fn owner_of(&self, witness: &str) -> Option<NodeId> {
        self.owners.get(witness).copied()
    }
}
