use std::{fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::invariants::ConfigurationError;

/// Declarative multi-network layout, e.g.
/// `{"networks": [{"InitNode": true, "ApiNode": true, "WitnessNodes": [3, 3]}]}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub networks: Vec<NetworkDescription>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkDescription {
    #[serde(default)]
    pub init_node: NodeCount,
    #[serde(default)]
    pub api_node: NodeCount,
    /// Witness count per witness node, in node order.
    #[serde(default)]
    pub witness_nodes: Vec<u32>,
    /// Optional declared total, checked against `witness_nodes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_count: Option<u32>,
    /// Indices of networks this one starts connected to. Defaults to every
    /// earlier network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_to: Option<Vec<usize>>,
}

/// Accepts either a flag (`true` = one node) or an explicit count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeCount {
    Flag(bool),
    Count(u32),
}

impl Default for NodeCount {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl NodeCount {
    #[must_use]
    pub const fn count(self) -> u32 {
        match self {
            Self::Flag(flag) => flag as u32,
            Self::Count(count) => count,
        }
    }
}

/// Parses JSON or YAML text.
impl FromStr for TopologyDescription {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(raw).map_err(|source| ConfigurationError::Parse { source })
    }
}

impl TopologyDescription {
    pub fn from_value(value: Value) -> Result<Self, ConfigurationError> {
        serde_json::from_value(value).map_err(|source| ConfigurationError::Decode { source })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        raw.parse()
    }

    #[must_use]
    pub fn with_network(mut self, network: NetworkDescription) -> Self {
        self.networks.push(network);
        self
    }
}

impl NetworkDescription {
    #[must_use]
    pub fn witnesses(counts: impl Into<Vec<u32>>) -> Self {
        Self {
            witness_nodes: counts.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_init_node(mut self) -> Self {
        self.init_node = NodeCount::Flag(true);
        self
    }

    #[must_use]
    pub const fn with_api_nodes(mut self, count: u32) -> Self {
        self.api_node = NodeCount::Count(count);
        self
    }

    #[must_use]
    pub fn connected_to(mut self, networks: impl Into<Vec<usize>>) -> Self {
        self.connected_to = Some(networks.into());
        self
    }

    /// `None` when the counts do not fit in a `u32`.
    #[must_use]
    pub fn total_witnesses(&self) -> Option<u32> {
        self.witness_nodes
            .iter()
            .try_fold(0u32, |total, count| total.checked_add(*count))
    }
}
