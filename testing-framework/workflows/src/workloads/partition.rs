use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use forknet_config::topology::NetworkId;
use forknet_core::{
    scenario::{DynError, Workload, WorkloadContext},
    topology::{NetworkOrchestrator, Networks},
};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, info};

use super::util::random_delay;

/// Repeatedly cuts and restores the link between two networks. Each full
/// cycle bumps the shared counter; the link is restored before returning.
pub struct PartitionFlapping {
    orchestrator: Arc<NetworkOrchestrator>,
    networks: Arc<Mutex<Networks>>,
    pair: (NetworkId, NetworkId),
    min_delay: Duration,
    max_delay: Duration,
}

impl PartitionFlapping {
    #[must_use]
    pub const fn new(
        orchestrator: Arc<NetworkOrchestrator>,
        networks: Arc<Mutex<Networks>>,
        a: NetworkId,
        b: NetworkId,
    ) -> Self {
        Self {
            orchestrator,
            networks,
            pair: (a, b),
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(9),
        }
    }

    /// Bounds of the random pause spent in each state.
    #[must_use]
    pub const fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    async fn set_connected(&self, connected: bool) -> Result<(), DynError> {
        let (a, b) = self.pair;
        let mut networks = self.networks.lock().await;
        if connected {
            self.orchestrator
                .connect_sub_networks(&mut networks, a, b)
                .await?;
        } else {
            self.orchestrator
                .disconnect_sub_networks(&mut networks, a, b)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Workload for PartitionFlapping {
    fn name(&self) -> &str {
        "partition_flapping"
    }

    async fn start(&self, ctx: &WorkloadContext) -> Result<(), DynError> {
        let (a, b) = self.pair;
        info!(%a, %b, "starting partition flapping");

        let mut cycles = 0u64;
        while !ctx.should_stop() {
            self.set_connected(false).await?;
            sleep(random_delay(self.min_delay, self.max_delay)).await;
            self.set_connected(true).await?;
            cycles = ctx.counter.increment();
            debug!(%a, %b, cycles, "partition cycle done");
            sleep(random_delay(self.min_delay, self.max_delay)).await;
        }

        self.set_connected(true).await?;
        info!(%a, %b, cycles, "partition flapping stopped");
        Ok(())
    }
}
