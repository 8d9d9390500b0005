use std::{fmt::Write as _, net::SocketAddr};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{COMMON_PLUGINS, DEFAULT_SHARED_FILE_SIZE, LOCALHOST, PRODUCER_PLUGINS},
    topology::{NodePlan, NodeRole},
};

/// Ports allocated to one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    pub p2p: u16,
    pub http: u16,
    pub ws: u16,
}

impl NodePorts {
    #[must_use]
    pub const fn p2p_endpoint(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.p2p)
    }

    #[must_use]
    pub const fn http_endpoint(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.http)
    }

    #[must_use]
    pub const fn ws_endpoint(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.ws)
    }
}

/// Contents of a node's `config.ini`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub ports: NodePorts,
    pub p2p_seed_nodes: Vec<SocketAddr>,
    pub witnesses: Vec<String>,
    pub private_keys: Vec<String>,
    pub plugins: Vec<String>,
    pub enable_stale_production: bool,
    pub required_participation: u32,
    pub shared_file_size: String,
    /// Extra `key = value` entries appended verbatim.
    pub extra: Vec<(String, String)>,
}

/// Builds the config for a planned node. Only the init node may produce on a
/// stale chain; that is what lets a fresh network start.
#[must_use]
pub fn create_node_config(
    plan: &NodePlan,
    ports: NodePorts,
    p2p_seed_nodes: Vec<SocketAddr>,
) -> NodeConfig {
    let role = plan.id.role;
    let mut plugins = COMMON_PLUGINS
        .iter()
        .map(|plugin| (*plugin).to_owned())
        .collect::<Vec<_>>();
    if role.produces_blocks() {
        plugins.extend(PRODUCER_PLUGINS.iter().map(|plugin| (*plugin).to_owned()));
    }

    let is_init = role == NodeRole::Init;

    NodeConfig {
        role,
        ports,
        p2p_seed_nodes,
        witnesses: plan
            .witnesses
            .iter()
            .map(|witness| witness.name().to_owned())
            .collect(),
        private_keys: plan
            .witnesses
            .iter()
            .map(|witness| witness.keys().private_key().to_owned())
            .collect(),
        plugins,
        enable_stale_production: is_init,
        required_participation: if is_init { 0 } else { 33 },
        shared_file_size: DEFAULT_SHARED_FILE_SIZE.to_owned(),
        extra: Vec::new(),
    }
}

impl NodeConfig {
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Renders `key = value` lines; repeated keys carry list values.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &dyn std::fmt::Display| {
            let _ = writeln!(out, "{key} = {value}");
        };

        line("p2p-endpoint", &self.ports.p2p_endpoint());
        for seed in &self.p2p_seed_nodes {
            line("p2p-seed-node", seed);
        }
        line("webserver-http-endpoint", &self.ports.http_endpoint());
        line("webserver-ws-endpoint", &self.ports.ws_endpoint());
        line("plugin", &self.plugins.join(" "));
        for witness in &self.witnesses {
            line("witness", &format!("\"{witness}\""));
        }
        for key in &self.private_keys {
            line("private-key", key);
        }
        line("enable-stale-production", &self.enable_stale_production);
        line("required-participation", &self.required_participation);
        line("shared-file-size", &self.shared_file_size);
        for (key, value) in &self.extra {
            line(key, value);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{NetworkId, NodeId, WitnessIdentity};

    fn plan(role: NodeRole, witnesses: &[&str]) -> NodePlan {
        NodePlan {
            id: NodeId {
                network: NetworkId(0),
                role,
                index: 0,
            },
            witnesses: witnesses
                .iter()
                .map(|name| WitnessIdentity::new(*name).unwrap())
                .collect(),
        }
    }

    const PORTS: NodePorts = NodePorts {
        p2p: 2001,
        http: 8091,
        ws: 8090,
    };

    #[test]
    fn witness_config_lists_witnesses_and_keys() {
        let config = create_node_config(
            &plan(NodeRole::Witness, &["witness-0-0", "witness-0-1"]),
            PORTS,
            vec!["127.0.0.1:2000".parse().unwrap()],
        );
        let rendered = config.render();

        assert!(rendered.contains("p2p-endpoint = 127.0.0.1:2001\n"));
        assert!(rendered.contains("p2p-seed-node = 127.0.0.1:2000\n"));
        assert!(rendered.contains("witness = \"witness-0-1\"\n"));
        assert_eq!(rendered.matches("private-key = ").count(), 2);
        assert!(rendered.contains("enable-stale-production = false\n"));
        assert!(rendered.contains(" witness"));
    }

    #[test]
    fn init_node_produces_on_stale_chain() {
        let config = create_node_config(&plan(NodeRole::Init, &["initminer"]), PORTS, vec![]);

        assert!(config.enable_stale_production);
        assert_eq!(config.required_participation, 0);
    }

    #[test]
    fn api_node_has_no_witness_plugin() {
        let config = create_node_config(&plan(NodeRole::Api, &[]), PORTS, vec![])
            .with_entry("log-level", "info");
        let rendered = config.render();

        assert!(!config.plugins.iter().any(|plugin| plugin == "witness"));
        assert!(rendered.ends_with("log-level = info\n"));
    }
}
