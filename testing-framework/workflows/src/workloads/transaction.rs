use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use forknet_core::{
    nodes::{WalletApi, wallet::asset},
    scenario::{DynError, Workload, WorkloadContext, WorkloadRunner},
};
use tokio::time::sleep;
use tracing::{debug, info};

const DEFAULT_AMOUNT_MILLI: u64 = 1;
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// One worker broadcasting small transfers until the run stops. Rejected
/// broadcasts are logged and skipped; accepted ones bump the shared counter.
#[derive(Clone)]
pub struct TransactionLoad {
    worker: usize,
    wallet: WalletApi,
    from: String,
    to: String,
    amount_milli: u64,
    interval: Duration,
}

impl TransactionLoad {
    #[must_use]
    pub fn new(wallet: WalletApi, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            worker: 0,
            wallet,
            from: from.into(),
            to: to.into(),
            amount_milli: DEFAULT_AMOUNT_MILLI,
            interval: DEFAULT_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_amount_milli(mut self, amount_milli: u64) -> Self {
        self.amount_milli = amount_milli;
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawns `workers` copies, each with its own memo prefix.
    pub fn spawn_workers(&self, runner: &mut WorkloadRunner, workers: usize) {
        for worker in 0..workers {
            let mut load = self.clone();
            load.worker = worker;
            runner.spawn(Arc::new(load));
        }
    }

    fn memo(&self, sequence: u64) -> String {
        format!("forknet load {}-{sequence}", self.worker)
    }
}

#[async_trait]
impl Workload for TransactionLoad {
    fn name(&self) -> &str {
        "transaction_load"
    }

    async fn start(&self, ctx: &WorkloadContext) -> Result<(), DynError> {
        info!(
            worker = self.worker,
            from = %self.from,
            to = %self.to,
            interval_ms = self.interval.as_millis(),
            "starting transaction load"
        );

        let amount = asset(self.amount_milli);
        let mut sequence = 0u64;
        let mut rejected = 0u64;
        while !ctx.should_stop() {
            sequence += 1;
            match self
                .wallet
                .transfer(&self.from, &self.to, &amount, &self.memo(sequence), true)
                .await
            {
                Ok(_) => {
                    ctx.counter.increment();
                }
                Err(err) => {
                    rejected += 1;
                    debug!(worker = self.worker, sequence, error = %err, "transfer rejected");
                }
            }
            sleep(self.interval).await;
        }

        info!(
            worker = self.worker,
            sent = sequence,
            rejected,
            "transaction load stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use forknet_config::topology::{NetworkDescription, NetworkId, TopologyDescription};
    use forknet_core::{
        nodes::sim::SimulatedCluster,
        scenario::{BreakCounter, StopSignal},
        topology::NetworkOrchestrator,
    };

    use super::*;

    async fn wallet(cluster: &SimulatedCluster) -> WalletApi {
        let description =
            TopologyDescription::default().with_network(NetworkDescription::witnesses([1]).with_init_node());
        let orchestrator = NetworkOrchestrator::new(cluster.launcher()).with_init_private_key(None);
        let mut networks = orchestrator.build(&description).unwrap();
        orchestrator.run(&mut networks, None).await.unwrap();
        let node = networks.get(NetworkId(0)).unwrap().wallet_node().unwrap();
        cluster.wallet(node.id())
    }

    #[tokio::test(start_paused = true)]
    async fn workers_stop_at_threshold_despite_rejections() {
        let cluster = SimulatedCluster::new();
        let wallet = wallet(&cluster).await;
        cluster.fail_transfers_every(3);
        let context = WorkloadContext::new(StopSignal::new(), BreakCounter::new(20));
        let mut runner = WorkloadRunner::new(context);

        TransactionLoad::new(wallet, "initminer", "alice")
            .with_interval(Duration::from_millis(100))
            .spawn_workers(&mut runner, 4);

        assert!(!runner.run_until(Duration::from_secs(60)).await.unwrap());
        assert!(runner.context().counter.reached());
        assert!(cluster.transfer_count() > 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_ends_every_worker() {
        let cluster = SimulatedCluster::new();
        let wallet = wallet(&cluster).await;
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        TransactionLoad::new(wallet, "initminer", "alice").spawn_workers(&mut runner, 3);

        assert!(runner.run_until(Duration::from_secs(2)).await.unwrap());
        runner.stop(Duration::from_secs(5)).await.unwrap();

        let sent = cluster.transfer_count();
        assert!(sent > 0);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(cluster.transfer_count(), sent);
    }
}
