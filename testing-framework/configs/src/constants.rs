use std::net::{IpAddr, Ipv4Addr};

/// Chain id of the public test network; override with `FORKNET_CHAIN_ID`.
pub const DEFAULT_CHAIN_ID: &str =
    "18dcf0a285365fc58b71f18b3d3fec954aa0c141c44e4e5cb4cf777b9eab274e";

/// Genesis witness hosted by an init node.
pub const INIT_WITNESS_NAME: &str = "initminer";

/// Prefix used when rendering public keys.
pub const DEFAULT_KEY_PREFIX: &str = "TST";

/// Secret word mixed into deterministic key derivation.
pub const DEFAULT_KEY_SECRET: &str = "secret";

/// Key role used for witness signing keys.
pub const SIGNING_KEY_ROLE: &str = "signing";

/// Base name for generated witness identities.
pub const WITNESS_NAME_PREFIX: &str = "witness";

/// Name of the config file written into every node data dir.
pub const NODE_CONFIG_FILENAME: &str = "config.ini";

pub const DEFAULT_SHARED_FILE_SIZE: &str = "128M";

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Plugins enabled on every node.
pub const COMMON_PLUGINS: &[&str] = &[
    "account_by_key",
    "account_by_key_api",
    "account_history_rocksdb",
    "account_history_api",
    "block_api",
    "condenser_api",
    "database_api",
    "debug_node_api",
    "network_broadcast_api",
    "network_node_api",
    "rc_api",
    "state_snapshot",
    "wallet_bridge_api",
];

/// Extra plugins for nodes that sign blocks.
pub const PRODUCER_PLUGINS: &[&str] = &["witness"];
