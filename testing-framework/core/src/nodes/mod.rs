pub mod api_client;
pub mod common;
pub mod node;
pub mod rpc;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod time;
pub mod wallet;

use std::{io, path::PathBuf};

pub use api_client::NodeApi;
use forknet_env as tf_env;
pub use node::{LaunchSpec, NodeHandle, NodeLauncher, NodeProcess, StartMode};
pub use rpc::{CommunicationError, JsonRpcClient, NodeRpc, RpcMethod, RpcMethodTable};
use tempfile::TempDir;
pub use time::TimeControl;
use tracing::info;
pub use wallet::{TransactionBatch, WalletApi, WalletMethod, WalletRpc, WitnessUpdate};

pub const LOGS_PREFIX: &str = "node";

/// Node data dir, under `FORKNET_LOG_DIR` when set.
pub fn create_tempdir() -> io::Result<TempDir> {
    match tf_env::forknet_log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            tempfile::Builder::new().prefix("forknet-").tempdir_in(dir)
        }
        None => tempfile::Builder::new().prefix("forknet-").tempdir(),
    }
}

/// Keeps the dir on disk after the handle drops and returns its path.
pub fn persist_tempdir(tempdir: TempDir, label: &str) -> PathBuf {
    let path = tempdir.keep();
    info!(node = label, path = %path.display(), "keeping node data dir");
    path
}

#[must_use]
pub fn should_persist_tempdir() -> bool {
    std::thread::panicking() || tf_env::forknet_tests_keep_logs()
}
