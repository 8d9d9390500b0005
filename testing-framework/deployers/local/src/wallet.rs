use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use forknet_config::{nodes::WalletConfig, timeouts};
use forknet_core::nodes::{
    CommunicationError, NodeHandle, NodeProcess as _, WalletApi,
    common::{
        binary::{BinaryConfig, BinaryResolver},
        node::{ProcessSpec, SpawnNodeError, spawn_process},
    },
    create_tempdir, persist_tempdir, should_persist_tempdir,
};
use forknet_env as tf_env;
use tempfile::TempDir;
use thiserror::Error;
use tokio::{net::TcpStream, time};
use tracing::{debug, info};

use crate::process::LocalProcess;

pub const WALLET_BINARY_NAME: &str = "cli_wallet";
const WALLET_FALLBACK_PATH: &str = "target/bin/cli_wallet";
const WALLET_LOG_PREFIX: &str = "wallet";
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WalletHandleError {
    #[error(transparent)]
    Spawn(#[from] SpawnNodeError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error("no free port for the wallet rpc endpoint")]
    NoFreePort,
    #[error("wallet at {endpoint} did not open its rpc port within {timeout:?}")]
    NotReady { endpoint: String, timeout: Duration },
}

/// A wallet daemon attached to one node's websocket endpoint.
pub struct WalletHandle {
    config: WalletConfig,
    api: WalletApi,
    process: Option<LocalProcess>,
    data_dir: Option<TempDir>,
}

impl WalletHandle {
    /// Spawns a wallet for `node` on a free local port, using the chain id
    /// from `FORKNET_CHAIN_ID` when set.
    pub async fn for_node(node: &NodeHandle) -> Result<Self, WalletHandleError> {
        let port = portpicker::pick_unused_port().ok_or(WalletHandleError::NoFreePort)?;
        let config = WalletConfig::new(
            node.config().ports.ws_endpoint(),
            port,
            tf_env::forknet_chain_id(),
        );
        Self::spawn(config).await
    }

    pub async fn spawn(config: WalletConfig) -> Result<Self, WalletHandleError> {
        let binary = resolve_wallet_binary();
        let data_dir = create_tempdir().map_err(|source| SpawnNodeError::TempDir { source })?;

        let child = spawn_process(&ProcessSpec {
            binary: &binary,
            args: config.args(),
            data_dir: data_dir.path(),
            env: &BTreeMap::new(),
            log_prefix: WALLET_LOG_PREFIX,
            capture_output: !tf_env::debug_tracing(),
        })?;
        info!(
            pid = child.id(),
            node = %config.node_ws,
            rpc = %config.rpc_endpoint(),
            "wallet process started"
        );

        let handle = Self {
            api: WalletApi::http(config.rpc_endpoint()),
            process: Some(LocalProcess::new(
                WALLET_LOG_PREFIX,
                child,
                timeouts::node_shutdown_timeout(),
            )),
            data_dir: Some(data_dir),
            config,
        };
        handle.wait_listening(timeouts::node_startup_timeout()).await?;
        Ok(handle)
    }

    #[must_use]
    pub const fn api(&self) -> &WalletApi {
        &self.api
    }

    #[must_use]
    pub const fn config(&self) -> &WalletConfig {
        &self.config
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(LocalProcess::pid)
    }

    /// Sets the password, unlocks the wallet and imports `private_keys`.
    pub async fn unlock_with_keys<'a>(
        &self,
        password: &str,
        private_keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), WalletHandleError> {
        self.api.set_password(password).await?;
        self.api.unlock(password).await?;
        self.api.import_keys(private_keys).await?;
        debug!(wallet = %self.api.endpoint(), "wallet unlocked");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), WalletHandleError> {
        if let Some(mut process) = self.process.take() {
            process.stop().await?;
        }
        Ok(())
    }

    async fn wait_listening(&self, timeout: Duration) -> Result<(), WalletHandleError> {
        let endpoint = self.config.rpc_endpoint();
        time::timeout(timeout, async {
            while TcpStream::connect(endpoint).await.is_err() {
                time::sleep(CONNECT_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| WalletHandleError::NotReady {
            endpoint: endpoint.to_string(),
            timeout,
        })
    }
}

impl Drop for WalletHandle {
    fn drop(&mut self) {
        self.process = None;
        if let Some(dir) = self.data_dir.take()
            && should_persist_tempdir()
        {
            let _ = persist_tempdir(dir, WALLET_LOG_PREFIX);
        }
    }
}

fn resolve_wallet_binary() -> PathBuf {
    BinaryResolver::resolve_path(&BinaryConfig {
        env_override: tf_env::forknet_wallet_bin(),
        env_var: "FORKNET_WALLET_BIN",
        binary_name: WALLET_BINARY_NAME,
        fallback_path: WALLET_FALLBACK_PATH,
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn listening_port_counts_as_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = WalletHandle {
            config: WalletConfig::new(SocketAddr::from(([127, 0, 0, 1], 8090)), port, None),
            api: WalletApi::http(SocketAddr::from(([127, 0, 0, 1], port))),
            process: None,
            data_dir: None,
        };

        handle
            .wait_listening(Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let port = portpicker::pick_unused_port().unwrap();
        let handle = WalletHandle {
            config: WalletConfig::new(SocketAddr::from(([127, 0, 0, 1], 8090)), port, None),
            api: WalletApi::http(SocketAddr::from(([127, 0, 0, 1], port))),
            process: None,
            data_dir: None,
        };

        let err = handle
            .wait_listening(Duration::from_millis(600))
            .await
            .unwrap_err();

        assert!(matches!(err, WalletHandleError::NotReady { .. }));
    }
}
