use std::{collections::BTreeSet, io, path::PathBuf};

use thiserror::Error;

use super::description::TopologyDescription;
use crate::keys::KeyDerivationError;

/// Malformed topology description; always raised before any process starts.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("topology must declare at least one network")]
    NoNetworks,
    #[error("network {network} requests {count} init nodes; at most one is allowed")]
    MultipleInitNodes { network: usize, count: u32 },
    #[error("network {network} declares more witnesses than fit in a u32")]
    TooManyWitnesses { network: usize },
    #[error("topology declares more witnesses than fit in a u32")]
    TooManyWitnessesTotal,
    #[error("network {network} witness node {node} has zero witnesses")]
    EmptyWitnessNode { network: usize, node: usize },
    #[error("network {network} declares {declared} witnesses but its nodes hold {actual}")]
    WitnessCountMismatch {
        network: usize,
        declared: u32,
        actual: u32,
    },
    #[error("topology declares no witnesses")]
    NoWitnesses,
    #[error("network {network} has no nodes")]
    EmptyNetwork { network: usize },
    #[error("network {network} is connected to unknown network {target}")]
    UnknownConnection { network: usize, target: usize },
    #[error("network {network} is connected to itself")]
    SelfConnection { network: usize },
    #[error("witness '{name}' is assigned to more than one node")]
    DuplicateWitness { name: String },
    #[error("failed to derive keys: {source}")]
    Keys {
        #[source]
        source: KeyDerivationError,
    },
    #[error("failed to read topology description {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse topology description: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to decode topology description: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

impl From<KeyDerivationError> for ConfigurationError {
    fn from(source: KeyDerivationError) -> Self {
        Self::Keys { source }
    }
}

/// Shape checks on a description; names and keys are checked while planning.
pub fn validate_description(description: &TopologyDescription) -> Result<(), ConfigurationError> {
    if description.networks.is_empty() {
        return Err(ConfigurationError::NoNetworks);
    }

    let mut has_init = false;
    let mut total_witnesses = 0u32;
    let n_networks = description.networks.len();

    for (network, spec) in description.networks.iter().enumerate() {
        let init_count = spec.init_node.count();
        if init_count > 1 {
            return Err(ConfigurationError::MultipleInitNodes {
                network,
                count: init_count,
            });
        }
        has_init |= init_count == 1;

        if let Some(node) = spec.witness_nodes.iter().position(|count| *count == 0) {
            return Err(ConfigurationError::EmptyWitnessNode { network, node });
        }

        let actual = spec
            .total_witnesses()
            .ok_or(ConfigurationError::TooManyWitnesses { network })?;
        if let Some(declared) = spec.witness_count {
            if declared != actual {
                return Err(ConfigurationError::WitnessCountMismatch {
                    network,
                    declared,
                    actual,
                });
            }
        }
        total_witnesses = total_witnesses
            .checked_add(actual)
            .ok_or(ConfigurationError::TooManyWitnessesTotal)?;

        if init_count == 0 && spec.api_node.count() == 0 && spec.witness_nodes.is_empty() {
            return Err(ConfigurationError::EmptyNetwork { network });
        }

        for target in spec.connected_to.iter().flatten().copied() {
            if target == network {
                return Err(ConfigurationError::SelfConnection { network });
            }
            if target >= n_networks {
                return Err(ConfigurationError::UnknownConnection { network, target });
            }
        }
    }

    if total_witnesses == 0 && !has_init {
        return Err(ConfigurationError::NoWitnesses);
    }

    Ok(())
}

/// Symmetric start-up connections as ordered `(low, high)` index pairs.
#[must_use]
pub fn initial_connections(description: &TopologyDescription) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for (network, spec) in description.networks.iter().enumerate() {
        match &spec.connected_to {
            Some(targets) => {
                for &target in targets {
                    if target != network {
                        pairs.insert((network.min(target), network.max(target)));
                    }
                }
            }
            None => {
                for earlier in 0..network {
                    pairs.insert((earlier, network));
                }
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::description::{NetworkDescription, NodeCount};

    fn description(networks: Vec<NetworkDescription>) -> TopologyDescription {
        TopologyDescription { networks }
    }

    #[test]
    fn rejects_two_init_nodes_in_one_network() {
        let mut network = NetworkDescription::witnesses([1]);
        network.init_node = NodeCount::Count(2);

        assert!(matches!(
            validate_description(&description(vec![network])),
            Err(ConfigurationError::MultipleInitNodes {
                network: 0,
                count: 2
            })
        ));
    }

    #[test]
    fn accepts_one_init_node_per_network() {
        let networks = vec![
            NetworkDescription::witnesses([2]).with_init_node(),
            NetworkDescription::witnesses([3]).with_init_node(),
        ];

        assert!(validate_description(&description(networks)).is_ok());
    }

    #[test]
    fn rejects_witness_counts_overflowing_u32() {
        let network = NetworkDescription::witnesses([u32::MAX, 1]);

        assert!(matches!(
            validate_description(&description(vec![network])),
            Err(ConfigurationError::TooManyWitnesses { network: 0 })
        ));
    }

    #[test]
    fn rejects_topology_total_overflowing_u32() {
        let networks = vec![
            NetworkDescription::witnesses([u32::MAX]),
            NetworkDescription::witnesses([1]),
        ];

        assert!(matches!(
            validate_description(&description(networks)),
            Err(ConfigurationError::TooManyWitnessesTotal)
        ));
    }

    #[test]
    fn rejects_declared_total_mismatch() {
        let mut network = NetworkDescription::witnesses([3, 4]);
        network.witness_count = Some(6);

        assert!(matches!(
            validate_description(&description(vec![network])),
            Err(ConfigurationError::WitnessCountMismatch {
                declared: 6,
                actual: 7,
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_sized_witness_node() {
        let network = NetworkDescription::witnesses([3, 0]);

        assert!(matches!(
            validate_description(&description(vec![network])),
            Err(ConfigurationError::EmptyWitnessNode {
                network: 0,
                node: 1
            })
        ));
    }

    #[test]
    fn rejects_bad_connections() {
        let a = NetworkDescription::witnesses([1]).connected_to([0]);
        assert!(matches!(
            validate_description(&description(vec![a])),
            Err(ConfigurationError::SelfConnection { network: 0 })
        ));

        let b = NetworkDescription::witnesses([1]).connected_to([3]);
        assert!(matches!(
            validate_description(&description(vec![b])),
            Err(ConfigurationError::UnknownConnection {
                network: 0,
                target: 3
            })
        ));
    }

    #[test]
    fn default_connections_link_every_earlier_network() {
        let networks = vec![
            NetworkDescription::witnesses([1]),
            NetworkDescription::witnesses([1]),
            NetworkDescription::witnesses([1]),
        ];
        let pairs = initial_connections(&description(networks));

        assert_eq!(
            pairs.into_iter().collect::<Vec<_>>(),
            vec![(0, 1), (0, 2), (1, 2)]
        );
    }

    #[test]
    fn explicit_empty_connections_isolate_a_network() {
        let networks = vec![
            NetworkDescription::witnesses([1]),
            NetworkDescription::witnesses([1]).connected_to([]),
        ];

        assert!(initial_connections(&description(networks)).is_empty());
    }
}
