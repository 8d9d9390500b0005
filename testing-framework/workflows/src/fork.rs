//! Two networks fork apart while most witnesses of the second one are
//! offline, then rejoin and must agree on one history.

use std::{ops::Range, time::Duration};

use forknet_config::topology::{
    NetworkDescription, NetworkId, TopologyDescription, WitnessIdentity,
};
use forknet_core::{
    nodes::WalletApi,
    scenario::{
        ConvergenceCondition, ForkScenarioDriver, LogState, NodeLog, ScenarioError,
        ScenarioPhase, WorkloadContext, WorkloadError, WorkloadRunner,
    },
    topology::{NetworkOrchestrator, Networks, OrchestratorError},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    assertions::{
        ConvergenceError, assert_lib_monotonic, assert_no_duplicate_virtual_ops,
        assert_progressed,
    },
    bootstrap::{BootstrapError, WitnessBootstrap},
    workloads::TransactionLoad,
};

const NETWORK_A: NetworkId = NetworkId(0);
const NETWORK_B: NetworkId = NetworkId(1);
const LOAD_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ForkScenarioError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error("network {network} has no {what}")]
    MissingNode {
        network: NetworkId,
        what: &'static str,
    },
}

/// Blocks waited after each step, counted on network A's api node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkBlocks {
    pub after_disable: u64,
    pub partitioned: u64,
    pub after_reconnect: u64,
    pub after_enable: u64,
}

impl Default for ForkBlocks {
    fn default() -> Self {
        Self {
            after_disable: 15,
            partitioned: 20,
            after_reconnect: 5,
            after_enable: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LoadPlan {
    pub workers: usize,
    pub from: String,
    pub to: String,
}

/// What the scenario observed, for callers that assert further.
#[derive(Clone, Debug)]
pub struct ForkReport {
    /// Log states right before the partition.
    pub before: Vec<LogState>,
    pub after: Vec<LogState>,
    pub phases: Vec<ScenarioPhase>,
    /// Blocks whose virtual ops were compared.
    pub checked_blocks: Range<u64>,
    /// Transfers accepted while the networks were apart.
    pub transfers: u64,
}

/// Built by [`crate::ForkScenarioBuilder`].
#[derive(Clone, Debug)]
pub struct ForkScenario {
    pub(crate) witnesses_a: Vec<u32>,
    pub(crate) witnesses_b: Vec<u32>,
    pub(crate) disabled_in_b: usize,
    pub(crate) blocks: ForkBlocks,
    pub(crate) load: Option<LoadPlan>,
    pub(crate) bootstrap: Option<WitnessBootstrap>,
}

impl ForkScenario {
    #[must_use]
    pub fn description(&self) -> TopologyDescription {
        TopologyDescription::default()
            .with_network(
                NetworkDescription::witnesses(self.witnesses_a.clone())
                    .with_init_node()
                    .with_api_nodes(1),
            )
            .with_network(NetworkDescription::witnesses(self.witnesses_b.clone()))
    }

    #[must_use]
    pub const fn disabled_in_b(&self) -> usize {
        self.disabled_in_b
    }

    #[must_use]
    pub const fn blocks(&self) -> &ForkBlocks {
        &self.blocks
    }

    /// Builds and starts both networks.
    pub async fn prepare(
        &self,
        orchestrator: &NetworkOrchestrator,
        environment: Option<&std::collections::BTreeMap<String, String>>,
    ) -> Result<Networks, ForkScenarioError> {
        let mut networks = orchestrator.build(&self.description())?;
        orchestrator.run(&mut networks, environment).await?;
        Ok(networks)
    }

    /// Witnesses of network B that go offline, all but the first ones.
    #[must_use]
    pub fn disabled_witnesses(&self, networks: &Networks) -> Vec<WitnessIdentity> {
        let in_b = networks.registry().in_network(NETWORK_B).collect::<Vec<_>>();
        let keep = in_b.len().saturating_sub(self.disabled_in_b);
        in_b.into_iter().skip(keep).cloned().collect()
    }

    /// Runs every step against running `networks`; `wallet` must be attached
    /// to a node of network A.
    pub async fn run(
        &self,
        driver: &mut ForkScenarioDriver,
        networks: &mut Networks,
        wallet: &WalletApi,
    ) -> Result<ForkReport, ForkScenarioError> {
        let reference_node = networks
            .get(NETWORK_A)
            .and_then(|network| network.api_node(0))
            .ok_or(ForkScenarioError::MissingNode {
                network: NETWORK_A,
                what: "api node",
            })?;
        let observer = networks
            .get(NETWORK_B)
            .and_then(|network| network.witness_nodes().next())
            .ok_or(ForkScenarioError::MissingNode {
                network: NETWORK_B,
                what: "witness node",
            })?;
        let mut logs = vec![NodeLog::for_node(reference_node), NodeLog::for_node(observer)];
        let reference = logs[0].api().clone();
        let disabled = self.disabled_witnesses(networks);

        if let Some(bootstrap) = &self.bootstrap {
            let witnesses = networks.registry().all().cloned().collect::<Vec<_>>();
            bootstrap.run(wallet, &witnesses).await?;
        }

        info!(disabled = disabled.len(), "fork scenario: waiting for common LIB");
        driver
            .wait_for_final_block(
                &reference,
                &mut logs,
                &[0, 1],
                true,
                ConvergenceCondition::IdenticalLib,
                false,
            )
            .await?;

        driver.disable_witnesses(wallet, &disabled).await?;
        driver
            .wait(self.blocks.after_disable, &mut logs, &reference, true)
            .await?;
        let before = logs.iter().map(NodeLog::state).collect::<Vec<_>>();

        driver
            .disconnect_sub_networks(networks, NETWORK_A, NETWORK_B)
            .await?;
        let load = self.start_load(wallet);
        let partitioned = driver
            .wait(self.blocks.partitioned, &mut logs, &reference, true)
            .await;
        let transfers = finish_load(load, partitioned).await?;

        driver
            .connect_sub_networks(networks, NETWORK_A, NETWORK_B)
            .await?;
        driver
            .wait(self.blocks.after_reconnect, &mut logs, &reference, true)
            .await?;
        driver.enable_witnesses(wallet, &disabled).await?;
        driver
            .wait(self.blocks.after_enable, &mut logs, &reference, true)
            .await?;
        driver
            .wait_for_final_block(
                &reference,
                &mut logs,
                &[0, 1],
                true,
                ConvergenceCondition::IdenticalLib,
                false,
            )
            .await?;

        let after = logs.iter().map(NodeLog::state).collect::<Vec<_>>();
        for (old, new) in before.iter().zip(&after) {
            assert_progressed(old, new)?;
        }
        assert_lib_monotonic(&logs)?;

        let final_lib = after.iter().filter_map(|state| state.lib).min().unwrap_or(0);
        let checked_blocks = 1..final_lib.saturating_add(1);
        assert_no_duplicate_virtual_ops(logs[0].api(), logs[1].api(), checked_blocks.clone())
            .await?;

        info!(
            final_lib,
            transfers,
            phases = ?driver.history(),
            "fork scenario passed"
        );
        Ok(ForkReport {
            before,
            after,
            phases: driver.history().to_vec(),
            checked_blocks,
            transfers,
        })
    }

    fn start_load(&self, wallet: &WalletApi) -> Option<WorkloadRunner> {
        let plan = self.load.as_ref()?;
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        TransactionLoad::new(wallet.clone(), plan.from.clone(), plan.to.clone())
            .spawn_workers(&mut runner, plan.workers);
        Some(runner)
    }
}

/// Stops the load started for the partition and returns how many transfers it
/// sent. A failed partition wait is reported ahead of a failed stop.
async fn finish_load(
    load: Option<WorkloadRunner>,
    partitioned: Result<(), ScenarioError>,
) -> Result<u64, ForkScenarioError> {
    let stopped = match load {
        Some(mut runner) => runner
            .stop(LOAD_STOP_GRACE)
            .await
            .map(|()| runner.context().counter.value()),
        None => Ok(0),
    };
    match (partitioned, stopped) {
        (Err(err), Err(stop_err)) => {
            warn!(error = %stop_err, "transfer load failed to stop cleanly");
            Err(err.into())
        }
        (Err(err), Ok(_)) => Err(err.into()),
        (Ok(()), stopped) => Ok(stopped?),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use forknet_core::scenario::{DynError, Workload};

    use super::*;

    struct Failing;

    #[async_trait]
    impl Workload for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn start(&self, _ctx: &WorkloadContext) -> Result<(), DynError> {
            Err("wallet rejected transfer".into())
        }
    }

    fn failing_load() -> WorkloadRunner {
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        runner.spawn(Arc::new(Failing));
        runner
    }

    fn stalled() -> Result<(), ScenarioError> {
        Err(ScenarioError::EmptyLog {
            label: "net0-api0".to_owned(),
        })
    }

    #[tokio::test]
    async fn partition_failure_wins_over_load_failure() {
        let err = finish_load(Some(failing_load()), stalled())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ForkScenarioError::Scenario(ScenarioError::EmptyLog { .. })
        ));
    }

    #[tokio::test]
    async fn load_failure_is_reported_after_a_clean_partition() {
        let err = finish_load(Some(failing_load()), Ok(())).await.unwrap_err();

        assert!(matches!(
            err,
            ForkScenarioError::Workload(WorkloadError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn no_load_sends_no_transfers() {
        assert_eq!(finish_load(None, Ok(())).await.unwrap(), 0);
        assert!(finish_load(None, stalled()).await.is_err());
    }
}
