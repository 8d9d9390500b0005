use std::time::Duration;

use forknet_config::{
    constants::DEFAULT_KEY_PREFIX, keys::null_public_key, timeouts, topology::NetworkId,
    topology::WitnessIdentity,
};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{
    conditions::{ConvergenceCondition, select},
    errors::{ScenarioError, ScenarioTimeoutError},
    log::NodeLog,
};
use crate::{
    nodes::{NodeApi, TransactionBatch, WalletApi, WitnessUpdate},
    topology::{NetworkOrchestrator, Networks},
};

/// Budgets of the polling loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause per block when waiting without requiring progress, and between
    /// convergence attempts.
    pub block_interval: Duration,
    /// Pause between head queries while waiting for blocks.
    pub poll_interval: Duration,
    /// Consecutive head queries without progress before `wait` gives up.
    pub stall_polls: u32,
    pub convergence_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            block_interval: timeouts::block_interval(),
            poll_interval: timeouts::poll_interval(),
            stall_polls: timeouts::stall_polls(),
            convergence_attempts: timeouts::convergence_attempts(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScenarioPhase {
    Connected,
    Partitioned,
    WitnessesDisabled,
    Reconnected,
    WitnessesRestored,
    Converged,
    Failed,
}

/// Runs the steps of one fork scenario and records the phases it went
/// through.
pub struct ForkScenarioDriver {
    orchestrator: NetworkOrchestrator,
    policy: PollPolicy,
    history: Vec<ScenarioPhase>,
}

impl ForkScenarioDriver {
    #[must_use]
    pub fn new(orchestrator: NetworkOrchestrator) -> Self {
        Self {
            orchestrator,
            policy: PollPolicy::default(),
            history: vec![ScenarioPhase::Connected],
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &NetworkOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    #[must_use]
    pub fn phase(&self) -> ScenarioPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(ScenarioPhase::Connected)
    }

    #[must_use]
    pub fn history(&self) -> &[ScenarioPhase] {
        &self.history
    }

    fn enter(&mut self, phase: ScenarioPhase) {
        if self.phase() != phase {
            info!(from = ?self.phase(), to = ?phase, "scenario phase");
            self.history.push(phase);
        }
    }

    fn track<T>(&mut self, result: Result<T, ScenarioError>) -> Result<T, ScenarioError> {
        if result.is_err() {
            self.enter(ScenarioPhase::Failed);
        }
        result
    }

    /// Waits until `reference` is `blocks` past its head at entry, sampling
    /// every log whenever the head moves. Without `require_new_block` it
    /// sleeps one block interval per block and samples after each.
    pub async fn wait(
        &mut self,
        blocks: u64,
        logs: &mut [NodeLog],
        reference: &NodeApi,
        require_new_block: bool,
    ) -> Result<(), ScenarioError> {
        let result = self
            .wait_inner(blocks, logs, reference, require_new_block)
            .await;
        self.track(result)
    }

    async fn wait_inner(
        &self,
        blocks: u64,
        logs: &mut [NodeLog],
        reference: &NodeApi,
        require_new_block: bool,
    ) -> Result<(), ScenarioError> {
        if blocks == 0 {
            return Ok(());
        }

        if !require_new_block {
            debug!(blocks, "sleeping through blocks");
            for _ in 0..blocks {
                sleep(self.policy.block_interval).await;
                sample_all(logs).await?;
            }
            return Ok(());
        }

        let start = reference.head_block_number().await?;
        let target = start.saturating_add(blocks);
        info!(node = %reference.endpoint(), start, target, "waiting for blocks");

        let mut last = start;
        let mut stalled = 0;
        loop {
            sleep(self.policy.poll_interval).await;
            let head = reference.head_block_number().await?;
            if head > last {
                last = head;
                stalled = 0;
                sample_all(logs).await?;
                debug!(head, target, "head advanced");
                if head >= target {
                    return Ok(());
                }
                continue;
            }

            stalled += 1;
            if stalled >= self.policy.stall_polls {
                return Err(ScenarioTimeoutError {
                    operation: "wait",
                    condition: format!(
                        "{} to reach block {target} (stuck at {last})",
                        reference.endpoint()
                    ),
                    attempts: stalled,
                    states: logs.iter().map(NodeLog::state).collect(),
                }
                .into());
            }
        }
    }

    /// Replaces the signing key of every witness with the null key in one
    /// transaction.
    pub async fn disable_witnesses(
        &mut self,
        wallet: &WalletApi,
        witnesses: &[WitnessIdentity],
    ) -> Result<(), ScenarioError> {
        let null_key = null_public_key(DEFAULT_KEY_PREFIX);
        let result = update_signing_keys(wallet, witnesses, |_| null_key.clone()).await;
        let result = self.track(result);
        if result.is_ok() && !witnesses.is_empty() {
            info!(count = witnesses.len(), "witnesses disabled");
            self.enter(ScenarioPhase::WitnessesDisabled);
        }
        result
    }

    /// Restores the derived signing key of every witness in one transaction.
    pub async fn enable_witnesses(
        &mut self,
        wallet: &WalletApi,
        witnesses: &[WitnessIdentity],
    ) -> Result<(), ScenarioError> {
        let result = update_signing_keys(wallet, witnesses, |witness| {
            witness.keys().public_key().to_owned()
        })
        .await;
        let result = self.track(result);
        if result.is_ok() && !witnesses.is_empty() {
            info!(count = witnesses.len(), "witnesses enabled");
            self.enter(ScenarioPhase::WitnessesRestored);
        }
        result
    }

    pub async fn disconnect_sub_networks(
        &mut self,
        networks: &mut Networks,
        a: NetworkId,
        b: NetworkId,
    ) -> Result<(), ScenarioError> {
        let was_connected = networks.are_connected(a, b);
        let result = self
            .orchestrator
            .disconnect_sub_networks(networks, a, b)
            .await
            .map_err(ScenarioError::from);
        self.track(result)?;
        if was_connected {
            self.enter(ScenarioPhase::Partitioned);
        }
        Ok(())
    }

    pub async fn connect_sub_networks(
        &mut self,
        networks: &mut Networks,
        a: NetworkId,
        b: NetworkId,
    ) -> Result<(), ScenarioError> {
        let was_connected = networks.are_connected(a, b);
        let result = self
            .orchestrator
            .connect_sub_networks(networks, a, b)
            .await
            .map_err(ScenarioError::from);
        self.track(result)?;
        if !was_connected {
            self.enter(ScenarioPhase::Reconnected);
        }
        Ok(())
    }

    pub fn get_last_irreversible_block_num(log: &NodeLog) -> Result<u64, ScenarioError> {
        log.last_sample()
            .map(|sample| sample.last_irreversible_block_num)
            .ok_or_else(|| ScenarioError::EmptyLog {
                label: log.label().to_owned(),
            })
    }

    pub fn get_last_head_block_number(log: &NodeLog) -> Result<u64, ScenarioError> {
        log.last_sample()
            .map(|sample| sample.head_block_number)
            .ok_or_else(|| ScenarioError::EmptyLog {
                label: log.label().to_owned(),
            })
    }

    /// Samples every log once per block interval until `condition` holds.
    /// With `require_identical_lib` the logs in `converge` must also agree
    /// on their last irreversible block.
    pub async fn wait_for_final_block(
        &mut self,
        reference: &NodeApi,
        logs: &mut [NodeLog],
        converge: &[usize],
        require_identical_lib: bool,
        condition: ConvergenceCondition,
        verbose: bool,
    ) -> Result<(), ScenarioError> {
        let result = self
            .wait_for_final_block_inner(
                reference,
                logs,
                converge,
                require_identical_lib,
                condition,
                verbose,
            )
            .await;
        self.track(result)?;
        self.enter(ScenarioPhase::Converged);
        Ok(())
    }

    async fn wait_for_final_block_inner(
        &self,
        reference: &NodeApi,
        logs: &mut [NodeLog],
        converge: &[usize],
        require_identical_lib: bool,
        condition: ConvergenceCondition,
        verbose: bool,
    ) -> Result<(), ScenarioError> {
        select(logs, converge)?;
        let mut description = condition.describe(logs, converge);
        if require_identical_lib && condition != ConvergenceCondition::IdenticalLib {
            description.push_str(" and identical LIB");
        }

        for attempt in 1..=self.policy.convergence_attempts {
            sleep(self.policy.block_interval).await;
            let head = reference.head_block_number().await?;
            sample_all(logs).await?;

            let mut holds = condition.holds(logs, converge)?;
            if require_identical_lib {
                holds &= ConvergenceCondition::IdenticalLib.holds(logs, converge)?;
            }

            if verbose {
                let states = logs
                    .iter()
                    .map(|log| log.state().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                info!(attempt, head, holds, %states, "convergence poll");
            } else {
                debug!(attempt, head, holds, "convergence poll");
            }

            if holds {
                info!(attempt, condition = %description, "converged");
                return Ok(());
            }
        }

        Err(ScenarioTimeoutError {
            operation: "wait_for_final_block",
            condition: description,
            attempts: self.policy.convergence_attempts,
            states: logs.iter().map(NodeLog::state).collect(),
        }
        .into())
    }
}

async fn sample_all(logs: &mut [NodeLog]) -> Result<(), ScenarioError> {
    for log in logs.iter_mut() {
        log.sample().await?;
    }
    Ok(())
}

async fn update_signing_keys(
    wallet: &WalletApi,
    witnesses: &[WitnessIdentity],
    key: impl Fn(&WitnessIdentity) -> String,
) -> Result<(), ScenarioError> {
    let mut batch = TransactionBatch::new();
    for witness in witnesses {
        let update = WitnessUpdate::new(witness.name(), key(witness));
        batch.push(wallet.update_witness(&update, false).await?);
    }
    wallet.broadcast_batch(batch).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use forknet_config::topology::{NetworkDescription, NodeId, NodeRole, TopologyDescription};

    use super::*;
    use crate::nodes::{CommunicationError, sim::SimulatedCluster};

    const BLOCK: Duration = Duration::from_secs(3);
    // a partitioned side misses the other side's slots
    const STALL_POLLS: u32 = 12;

    fn policy() -> PollPolicy {
        PollPolicy {
            block_interval: BLOCK,
            poll_interval: Duration::from_secs(1),
            stall_polls: STALL_POLLS,
            convergence_attempts: 10,
        }
    }

    fn init_id() -> NodeId {
        NodeId {
            network: NetworkId(0),
            role: NodeRole::Init,
            index: 0,
        }
    }

    fn minority_id() -> NodeId {
        NodeId {
            network: NetworkId(1),
            role: NodeRole::Witness,
            index: 0,
        }
    }

    /// Seven witnesses with the init node in network 0, one in network 1.
    async fn setup(cluster: &SimulatedCluster) -> (ForkScenarioDriver, Networks) {
        let description = TopologyDescription::default()
            .with_network(NetworkDescription::witnesses([3, 3]).with_init_node())
            .with_network(NetworkDescription::witnesses([1]));
        let orchestrator =
            NetworkOrchestrator::new(cluster.launcher()).with_init_private_key(None);
        let mut networks = orchestrator.build(&description).unwrap();
        orchestrator.run(&mut networks, None).await.unwrap();
        (
            ForkScenarioDriver::new(orchestrator).with_policy(policy()),
            networks,
        )
    }

    fn logs(networks: &Networks) -> Vec<NodeLog> {
        [init_id(), minority_id()]
            .into_iter()
            .map(|id| NodeLog::for_node(networks.node(id).unwrap()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn wait_samples_until_reference_advanced() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();
        let _producer = cluster.spawn_block_producer(BLOCK);

        driver.wait(5, &mut logs, &reference, true).await.unwrap();

        assert!(cluster.head(init_id()).unwrap() >= 5);
        assert!(!logs[0].is_empty());
        assert_eq!(logs[0].len(), logs[1].len());
        assert!(ForkScenarioDriver::get_last_head_block_number(&logs[0]).unwrap() >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_on_stalled_node_times_out() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();

        let err = driver.wait(5, &mut logs, &reference, true).await.unwrap_err();

        let ScenarioError::Timeout(timeout) = err else {
            panic!("expected timeout, got {err}");
        };
        assert_eq!(timeout.operation, "wait");
        assert_eq!(timeout.attempts, STALL_POLLS);
        assert_eq!(timeout.states.len(), 2);
        assert_eq!(driver.phase(), ScenarioPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_without_new_blocks_sleeps_and_samples() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();
        let started = tokio::time::Instant::now();

        driver.wait(4, &mut logs, &reference, false).await.unwrap();

        assert_eq!(started.elapsed(), BLOCK * 4);
        assert_eq!(logs[0].len(), 4);
        assert_eq!(logs[1].len(), 4);
        assert_eq!(ForkScenarioDriver::get_last_head_block_number(&logs[0]).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_blocks_returns_immediately() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();

        driver.wait(0, &mut logs, &reference, true).await.unwrap();

        assert!(logs.iter().all(NodeLog::is_empty));
    }

    #[tokio::test(start_paused = true)]
    async fn witnesses_toggle_in_one_batch() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let wallet = cluster.wallet(init_id());
        let witnesses = networks
            .registry()
            .select(["witness-0-1", "witness-0-4"])
            .unwrap();

        driver.disable_witnesses(&wallet, &witnesses).await.unwrap();
        assert!(!cluster.is_enabled("witness-0-1"));
        assert!(!cluster.is_enabled("witness-0-4"));
        assert!(cluster.is_enabled("witness-0-2"));

        driver.enable_witnesses(&wallet, &witnesses).await.unwrap();
        assert!(cluster.is_enabled("witness-0-1"));
        assert_eq!(
            driver.history(),
            [
                ScenarioPhase::Connected,
                ScenarioPhase::WitnessesDisabled,
                ScenarioPhase::WitnessesRestored
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_witness_subset_is_a_no_op() {
        let cluster = SimulatedCluster::new();
        let (mut driver, _networks) = setup(&cluster).await;
        let wallet = cluster.wallet(init_id());
        let calls = cluster.rpc_call_count();

        driver.disable_witnesses(&wallet, &[]).await.unwrap();

        assert_eq!(cluster.rpc_call_count(), calls);
        assert_eq!(driver.phase(), ScenarioPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_witness_update_is_not_retried() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let wallet = cluster.wallet(init_id());
        let witnesses = networks.registry().select(["witness-1-0"]).unwrap();
        cluster.fail_next_wallet_call("wallet is locked");

        let err = driver
            .disable_witnesses(&wallet, &witnesses)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScenarioError::Communication(CommunicationError::Rpc { .. })
        ));
        assert!(cluster.is_enabled("witness-1-0"));
        assert_eq!(driver.phase(), ScenarioPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoined_networks_converge_on_lib() {
        let cluster = SimulatedCluster::new();
        let (mut driver, mut networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();
        let _producer = cluster.spawn_block_producer(BLOCK);
        let (a, b) = (NetworkId(0), NetworkId(1));

        driver.wait(3, &mut logs, &reference, true).await.unwrap();
        driver
            .disconnect_sub_networks(&mut networks, a, b)
            .await
            .unwrap();
        driver.wait(10, &mut logs, &reference, true).await.unwrap();
        let minority_lib = ForkScenarioDriver::get_last_irreversible_block_num(&logs[1]).unwrap();
        assert!(ForkScenarioDriver::get_last_irreversible_block_num(&logs[0]).unwrap() > minority_lib);

        driver
            .connect_sub_networks(&mut networks, a, b)
            .await
            .unwrap();
        driver
            .wait_for_final_block(
                &reference,
                &mut logs,
                &[0, 1],
                true,
                ConvergenceCondition::LibAdvancedPast {
                    log: 1,
                    floor: minority_lib,
                },
                true,
            )
            .await
            .unwrap();

        assert_eq!(
            driver.history(),
            [
                ScenarioPhase::Connected,
                ScenarioPhase::Partitioned,
                ScenarioPhase::Reconnected,
                ScenarioPhase::Converged
            ]
        );
        assert!(logs.iter().all(|log| log.lib_regressions().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn partitioned_networks_never_converge() {
        let cluster = SimulatedCluster::new();
        let (mut driver, mut networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();
        let _producer = cluster.spawn_block_producer(BLOCK);

        driver.wait(3, &mut logs, &reference, true).await.unwrap();
        driver
            .disconnect_sub_networks(&mut networks, NetworkId(0), NetworkId(1))
            .await
            .unwrap();
        driver.wait(3, &mut logs, &reference, true).await.unwrap();

        let err = driver
            .wait_for_final_block(
                &reference,
                &mut logs,
                &[0, 1],
                true,
                ConvergenceCondition::IdenticalLib,
                false,
            )
            .await
            .unwrap_err();

        let ScenarioError::Timeout(timeout) = err else {
            panic!("expected timeout, got {err}");
        };
        assert_eq!(timeout.attempts, 10);
        assert!(timeout.condition.contains("identical LIB"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_converge_index_is_rejected() {
        let cluster = SimulatedCluster::new();
        let (mut driver, networks) = setup(&cluster).await;
        let mut logs = logs(&networks);
        let reference = logs[0].api().clone();

        let err = driver
            .wait_for_final_block(
                &reference,
                &mut logs,
                &[0, 5],
                false,
                ConvergenceCondition::IdenticalHead,
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ScenarioError::UnknownLog { index: 5, len: 2 }));
    }

    #[test]
    fn accessors_reject_empty_logs() {
        let log = crate::scenario::log::detached_log("net1-witness0");

        assert!(matches!(
            ForkScenarioDriver::get_last_irreversible_block_num(&log),
            Err(ScenarioError::EmptyLog { label }) if label == "net1-witness0"
        ));
        assert!(ForkScenarioDriver::get_last_head_block_number(&log).is_err());
    }
}
