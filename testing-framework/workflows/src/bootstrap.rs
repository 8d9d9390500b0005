//! Registers the witnesses of a freshly started topology on chain.

use std::time::Duration;

use forknet_config::{constants::INIT_WITNESS_NAME, topology::WitnessIdentity};
use forknet_core::nodes::{CommunicationError, TransactionBatch, WalletApi, WitnessUpdate};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_VESTING_MILLI: u64 = 1_000_000;
const DEFAULT_SCHEDULE_ATTEMPTS: u32 = 60;
const DEFAULT_SCHEDULE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error("witness '{name}' still has no signing key after {attempts} checks")]
    NotScheduled { name: String, attempts: u32 },
}

/// Creates, funds and registers witness accounts through the init wallet.
#[derive(Clone, Debug)]
pub struct WitnessBootstrap {
    creator: String,
    vesting_milli: u64,
    batch_size: usize,
    schedule_attempts: u32,
    schedule_poll: Duration,
}

impl Default for WitnessBootstrap {
    fn default() -> Self {
        Self {
            creator: INIT_WITNESS_NAME.to_owned(),
            vesting_milli: DEFAULT_VESTING_MILLI,
            batch_size: DEFAULT_BATCH_SIZE,
            schedule_attempts: DEFAULT_SCHEDULE_ATTEMPTS,
            schedule_poll: DEFAULT_SCHEDULE_POLL,
        }
    }
}

impl WitnessBootstrap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Witness updates per broadcast transaction; at least one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_vesting_milli(mut self, vesting_milli: u64) -> Self {
        self.vesting_milli = vesting_milli;
        self
    }

    #[must_use]
    pub const fn with_schedule_wait(mut self, attempts: u32, poll: Duration) -> Self {
        self.schedule_attempts = attempts;
        self.schedule_poll = poll;
        self
    }

    /// Sets the wallet password, unlocks it and imports the creator key.
    pub async fn prepare_wallet(
        &self,
        wallet: &WalletApi,
        password: &str,
        creator_key: &str,
    ) -> Result<(), BootstrapError> {
        wallet.set_password(password).await?;
        wallet.unlock(password).await?;
        wallet.import_key(creator_key).await?;
        Ok(())
    }

    /// Registers every witness except the genesis one, then waits until the
    /// chain reports the expected signing keys.
    pub async fn run(
        &self,
        wallet: &WalletApi,
        witnesses: &[WitnessIdentity],
    ) -> Result<(), BootstrapError> {
        let witnesses = witnesses
            .iter()
            .filter(|witness| witness.name() != self.creator)
            .collect::<Vec<_>>();
        info!(count = witnesses.len(), creator = %self.creator, "bootstrapping witnesses");

        let stake = forknet_core::nodes::wallet::asset(self.vesting_milli);
        for witness in &witnesses {
            let public_key = witness.keys().public_key();
            wallet
                .create_account_with_keys(&self.creator, witness.name(), public_key, true)
                .await?;
            wallet
                .transfer_to_vesting(&self.creator, witness.name(), &stake, true)
                .await?;
            wallet.import_key(witness.keys().private_key()).await?;
            debug!(witness = %witness, "account created and funded");
        }

        for chunk in witnesses.chunks(self.batch_size) {
            let mut batch = TransactionBatch::new();
            for witness in chunk {
                let update = WitnessUpdate::new(witness.name(), witness.keys().public_key());
                batch.push(wallet.update_witness(&update, false).await?);
            }
            wallet.broadcast_batch(batch).await?;
            debug!(count = chunk.len(), "witness updates broadcast");
        }

        for witness in &witnesses {
            self.wait_scheduled(wallet, witness).await?;
        }
        info!(count = witnesses.len(), "witnesses scheduled");
        Ok(())
    }

    async fn wait_scheduled(
        &self,
        wallet: &WalletApi,
        witness: &WitnessIdentity,
    ) -> Result<(), BootstrapError> {
        for _ in 0..self.schedule_attempts {
            if let Some(info) = wallet.get_witness(witness.name()).await?
                && info.signing_key == witness.keys().public_key()
            {
                return Ok(());
            }
            sleep(self.schedule_poll).await;
        }
        Err(BootstrapError::NotScheduled {
            name: witness.name().to_owned(),
            attempts: self.schedule_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use forknet_config::topology::{NetworkDescription, NetworkId, TopologyDescription};
    use forknet_core::{nodes::sim::SimulatedCluster, topology::NetworkOrchestrator};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn registers_every_witness_in_batches() {
        let cluster = SimulatedCluster::new();
        let description = TopologyDescription::default()
            .with_network(NetworkDescription::witnesses([3, 2]).with_init_node());
        let orchestrator = NetworkOrchestrator::new(cluster.launcher()).with_init_private_key(None);
        let mut networks = orchestrator.build(&description).unwrap();
        orchestrator.run(&mut networks, None).await.unwrap();
        let network = networks.get(NetworkId(0)).unwrap();
        let wallet = cluster.wallet(network.wallet_node().unwrap().id());
        let witnesses = network.witnesses().cloned().collect::<Vec<_>>();

        let bootstrap = WitnessBootstrap::new().with_batch_size(2);
        bootstrap
            .prepare_wallet(&wallet, "secret", witnesses[0].keys().private_key())
            .await
            .unwrap();
        bootstrap.run(&wallet, &witnesses).await.unwrap();

        for witness in &witnesses[1..] {
            let info = wallet.get_witness(witness.name()).await.unwrap().unwrap();
            assert_eq!(info.signing_key, witness.keys().public_key());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_update_stops_the_bootstrap() {
        let cluster = SimulatedCluster::new();
        let description = TopologyDescription::default()
            .with_network(NetworkDescription::witnesses([2]).with_init_node());
        let orchestrator = NetworkOrchestrator::new(cluster.launcher()).with_init_private_key(None);
        let mut networks = orchestrator.build(&description).unwrap();
        orchestrator.run(&mut networks, None).await.unwrap();
        let network = networks.get(NetworkId(0)).unwrap();
        let wallet = cluster.wallet(network.wallet_node().unwrap().id());
        let witnesses = network.witnesses().cloned().collect::<Vec<_>>();
        cluster.fail_next_wallet_call("missing required active authority");

        let err = WitnessBootstrap::new()
            .run(&wallet, &witnesses)
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::Communication(_)));
    }
}
