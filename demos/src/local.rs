use std::sync::Arc;

use anyhow::{Context as _, Result};
use forknet_config::topology::NetworkId;
use forknet_core::{
    scenario::ForkScenarioDriver,
    topology::{NetworkOrchestrator, Networks},
};
use forknet_runner_local::{LocalLauncher, WalletHandle};
use forknet_workflows::ForkScenario;
use tracing::info;

pub const WALLET_PASSWORD: &str = "secret";

/// Both networks of a fork scenario running as local processes, plus the
/// wallet attached to the init node.
pub struct LocalFork {
    pub driver: ForkScenarioDriver,
    pub networks: Networks,
    pub wallet: WalletHandle,
}

impl LocalFork {
    pub async fn shutdown(mut self) -> Result<()> {
        self.wallet.stop().await.context("stopping wallet")?;
        self.networks.stop_all().await.context("stopping nodes")?;
        Ok(())
    }
}

/// Starts the scenario's topology with the binaries from `FORKNET_NODE_BIN`
/// and `FORKNET_WALLET_BIN`, then unlocks a wallet holding the init key.
pub async fn start_local_fork(scenario: &ForkScenario) -> Result<LocalFork> {
    let launcher = Arc::new(LocalLauncher::from_env());
    info!(binary = %launcher.node_binary().display(), "using local node binary");
    let orchestrator = NetworkOrchestrator::new(launcher);

    let networks = scenario
        .prepare(&orchestrator, None)
        .await
        .context("starting networks")?;

    let init = networks
        .get(NetworkId(0))
        .and_then(|network| network.init_node())
        .context("first network has no init node")?;
    let init_key = init
        .witnesses()
        .first()
        .map(|witness| witness.keys().private_key().to_owned())
        .context("init node carries no witness")?;

    let wallet = WalletHandle::for_node(init)
        .await
        .context("starting wallet")?;
    wallet
        .unlock_with_keys(WALLET_PASSWORD, [init_key.as_str()])
        .await
        .context("unlocking wallet")?;

    Ok(LocalFork {
        driver: ForkScenarioDriver::new(orchestrator),
        networks,
        wallet,
    })
}
