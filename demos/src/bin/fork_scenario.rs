use std::process;

use anyhow::{Context as _, Result};
use forknet_demos::{init_tracing, read_env_any, start_local_fork};
use forknet_workflows::{ForkScenarioBuilder, WitnessBootstrap};
use tracing::{info, warn};

const DEFAULT_DISABLED: usize = 14;
const DEFAULT_LOAD_WORKERS: usize = 0;
const LOAD_RECIPIENT: &str = "witness-0-0";

#[tokio::main]
async fn main() {
    init_tracing();

    let disabled = read_env_any(&["FORKNET_DEMO_DISABLED"], DEFAULT_DISABLED);
    let workers = read_env_any(&["FORKNET_DEMO_LOAD_WORKERS"], DEFAULT_LOAD_WORKERS);
    let bootstrap = read_env_any(&["FORKNET_DEMO_BOOTSTRAP"], true);

    info!(disabled, workers, bootstrap, "starting fork scenario demo");

    if let Err(err) = run(disabled, workers, bootstrap).await {
        warn!("fork scenario demo failed: {err:#}");
        process::exit(1);
    }
}

async fn run(disabled: usize, workers: usize, bootstrap: bool) -> Result<()> {
    let mut builder = ForkScenarioBuilder::new().disabled_in_b(disabled);
    if workers > 0 {
        builder = builder.transfer_load(workers, LOAD_RECIPIENT);
    }
    if bootstrap {
        builder = builder.bootstrap(WitnessBootstrap::new());
    }
    let scenario = builder.build()?;

    let mut fork = start_local_fork(&scenario).await?;
    let outcome = scenario
        .run(&mut fork.driver, &mut fork.networks, fork.wallet.api())
        .await
        .context("running fork scenario");
    let shutdown = fork.shutdown().await;

    let report = outcome?;
    shutdown?;
    info!(
        checked = ?report.checked_blocks,
        transfers = report.transfers,
        phases = ?report.phases,
        "fork scenario complete"
    );
    Ok(())
}
