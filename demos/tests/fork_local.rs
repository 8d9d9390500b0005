use anyhow::Result;
use forknet_demos::{init_tracing, start_local_fork};
use forknet_workflows::{ForkBlocks, ForkScenarioBuilder, WitnessBootstrap};

#[tokio::test]
#[ignore = "requires node and wallet binaries"]
async fn networks_rejoin_after_partition() -> Result<()> {
    init_tracing();
    // FORKNET_NODE_BIN and FORKNET_WALLET_BIN must point at the binaries.
    let scenario = ForkScenarioBuilder::new()
        .bootstrap(WitnessBootstrap::new())
        .build()?;

    let mut fork = start_local_fork(&scenario).await?;
    let outcome = scenario
        .run(&mut fork.driver, &mut fork.networks, fork.wallet.api())
        .await;
    fork.shutdown().await?;

    let report = outcome?;
    assert!(report.checked_blocks.end > 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires node and wallet binaries"]
async fn short_partition_with_transfer_load() -> Result<()> {
    init_tracing();
    let scenario = ForkScenarioBuilder::new()
        .witnesses_b([3])
        .disabled_in_b(2)
        .blocks(ForkBlocks {
            after_disable: 5,
            partitioned: 10,
            after_reconnect: 3,
            after_enable: 10,
        })
        .transfer_load(2, "witness-0-0")
        .bootstrap(WitnessBootstrap::new())
        .build()?;

    let mut fork = start_local_fork(&scenario).await?;
    let outcome = scenario
        .run(&mut fork.driver, &mut fork.networks, fork.wallet.api())
        .await;
    fork.shutdown().await?;

    let report = outcome?;
    assert!(report.transfers > 0, "no transfer landed during the partition");
    Ok(())
}
