use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CHAIN_ID, LOCALHOST};

/// Command line of a wallet daemon attached to one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub chain_id: String,
    pub node_ws: SocketAddr,
    pub rpc_http_port: u16,
}

impl WalletConfig {
    #[must_use]
    pub fn new(node_ws: SocketAddr, rpc_http_port: u16, chain_id: Option<String>) -> Self {
        Self {
            chain_id: chain_id.unwrap_or_else(|| DEFAULT_CHAIN_ID.to_owned()),
            node_ws,
            rpc_http_port,
        }
    }

    #[must_use]
    pub const fn rpc_endpoint(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.rpc_http_port)
    }

    #[must_use]
    pub fn args(&self) -> Vec<String> {
        vec![
            "--chain-id".to_owned(),
            self.chain_id.clone(),
            "--server-rpc-endpoint".to_owned(),
            format!("ws://{}", self.node_ws),
            "--rpc-http-endpoint".to_owned(),
            self.rpc_endpoint().to_string(),
            "--daemon".to_owned(),
        ]
    }
}
