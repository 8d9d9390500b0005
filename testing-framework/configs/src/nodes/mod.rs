pub mod node;
pub mod wallet;

pub use node::{NodeConfig, NodePorts, create_node_config};
pub use wallet::WalletConfig;
