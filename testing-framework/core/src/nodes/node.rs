use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use forknet_config::{
    nodes::{NodeConfig, NodePorts},
    timeouts,
    topology::{NodeId, WitnessIdentity},
};
use forknet_env as tf_env;
use tracing::{debug, info};

use super::{
    CommunicationError, NodeApi, TimeControl,
    common::node::{SpawnNodeError, wait_until_live},
};
use crate::topology::utils::pick_free_ports;

const DEFAULT_LIBFAKETIME: &str = "libfaketime.so.1";

/// How a node process is started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartMode {
    /// Empty data dir.
    Fresh,
    /// Continue from the state left by the previous run.
    Resume,
    /// Rebuild state from the block log, optionally copied in first.
    Replay {
        block_log: Option<PathBuf>,
        stop_at: Option<u64>,
    },
    LoadSnapshot { name: String },
    /// Write a snapshot and exit.
    DumpSnapshot { name: String },
}

impl StartMode {
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Fresh | Self::Resume => Vec::new(),
            Self::Replay { stop_at, .. } => {
                let mut args = vec!["--force-replay".to_owned()];
                if let Some(block) = stop_at {
                    args.push(format!("--stop-at-block={block}"));
                }
                args
            }
            Self::LoadSnapshot { name } => vec![format!("--load-snapshot={name}")],
            Self::DumpSnapshot { name } => vec![
                format!("--dump-snapshot={name}"),
                "--exit-before-sync".to_owned(),
            ],
        }
    }

    #[must_use]
    pub const fn exits_when_done(&self) -> bool {
        matches!(self, Self::DumpSnapshot { .. })
    }
}

/// Request handed to a [`NodeLauncher`].
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub id: NodeId,
    pub config: NodeConfig,
    pub env: BTreeMap<String, String>,
    pub mode: StartMode,
}

/// A started node process.
#[async_trait]
pub trait NodeProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn is_running(&mut self) -> bool;

    /// Stops the process and waits until it is gone.
    async fn stop(&mut self) -> Result<(), SpawnNodeError>;

    /// Returns true if the process exited on its own within `timeout`.
    async fn wait_for_exit(&mut self, timeout: Duration) -> bool;
}

/// Starts node processes. Local binaries in production, an in-memory model
/// in tests.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// RPC view of the node `id` configured by `config`. Valid before the
    /// node runs.
    fn api(&self, id: NodeId, config: &NodeConfig) -> NodeApi;

    /// Returns once the process is started; liveness is checked by the
    /// caller.
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn NodeProcess>, SpawnNodeError>;

    fn allocate_ports(&self, _id: NodeId, taken: &mut BTreeSet<u16>) -> Option<NodePorts> {
        pick_free_ports(taken)
    }
}

/// One node of a network plus the process currently backing it.
pub struct NodeHandle {
    id: NodeId,
    config: NodeConfig,
    witnesses: Vec<WitnessIdentity>,
    api: NodeApi,
    launcher: Arc<dyn NodeLauncher>,
    process: Option<Box<dyn NodeProcess>>,
    env: BTreeMap<String, String>,
    time_control: Option<TimeControl>,
    peer_id: Option<String>,
    launched: bool,
}

impl NodeHandle {
    #[must_use]
    pub fn new(
        id: NodeId,
        config: NodeConfig,
        witnesses: Vec<WitnessIdentity>,
        launcher: Arc<dyn NodeLauncher>,
    ) -> Self {
        let api = launcher.api(id, &config);
        Self {
            id,
            config,
            witnesses,
            api,
            launcher,
            process: None,
            env: BTreeMap::new(),
            time_control: None,
            peer_id: None,
            launched: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.id.to_string()
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn witnesses(&self) -> &[WitnessIdentity] {
        &self.witnesses
    }

    #[must_use]
    pub const fn api(&self) -> &NodeApi {
        &self.api
    }

    /// P2P node id, known once the node ran.
    #[must_use]
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|process| process.pid())
    }

    pub fn is_running(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.is_running())
    }

    /// Extra environment for the next start.
    pub fn set_environment(&mut self, env: BTreeMap<String, String>) {
        self.env = env;
    }

    /// Clock for the next start; `None` runs on real time.
    pub fn set_time_control(&mut self, time_control: Option<TimeControl>) {
        self.time_control = time_control;
    }

    #[must_use]
    pub const fn time_control(&self) -> Option<&TimeControl> {
        self.time_control.as_ref()
    }

    fn launch_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(time) = &self.time_control {
            let library = tf_env::forknet_libfaketime_path()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBFAKETIME));
            env.extend(time.env(&library));
        }
        env
    }

    /// Starts the process without waiting for it to answer.
    pub async fn start(&mut self, mode: StartMode) -> Result<(), SpawnNodeError> {
        if self.is_running() {
            return Err(SpawnNodeError::AlreadyRunning { node: self.label() });
        }

        debug!(node = %self.id, ?mode, "starting node");
        let process = self
            .launcher
            .launch(LaunchSpec {
                id: self.id,
                config: self.config.clone(),
                env: self.launch_env(),
                mode,
            })
            .await?;
        self.process = Some(process);
        self.launched = true;
        Ok(())
    }

    pub async fn wait_live(&self, timeout: Duration) -> Result<(), SpawnNodeError> {
        wait_until_live(&self.api, &self.label(), timeout).await
    }

    /// Starts fresh on the first launch and resumes afterwards.
    pub async fn spawn(&mut self) -> Result<(), SpawnNodeError> {
        let mode = if self.launched {
            StartMode::Resume
        } else {
            StartMode::Fresh
        };
        self.start(mode).await
    }

    /// [`Self::spawn`] and wait until the node answers RPC.
    pub async fn run(&mut self) -> Result<(), SpawnNodeError> {
        self.spawn().await?;
        self.wait_live(timeouts::node_startup_timeout()).await
    }

    /// No-op when the node is not running.
    pub async fn stop(&mut self) -> Result<(), SpawnNodeError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        info!(node = %self.id, pid = ?process.pid(), "stopping node");
        process.stop().await
    }

    pub async fn restart(&mut self) -> Result<(), SpawnNodeError> {
        self.stop().await?;
        self.start(StartMode::Resume).await?;
        self.wait_live(timeouts::node_startup_timeout()).await
    }

    pub async fn replay(
        &mut self,
        block_log: Option<PathBuf>,
        stop_at: Option<u64>,
    ) -> Result<(), SpawnNodeError> {
        self.stop().await?;
        self.start(StartMode::Replay { block_log, stop_at }).await?;
        self.wait_live(timeouts::node_startup_timeout()).await
    }

    /// Stops the node, writes snapshot `name` and leaves the node stopped.
    pub async fn dump_snapshot(&mut self, name: &str) -> Result<(), SpawnNodeError> {
        self.stop().await?;
        self.start(StartMode::DumpSnapshot {
            name: name.to_owned(),
        })
        .await?;

        let timeout = timeouts::node_startup_timeout();
        let finished = match self.process.as_mut() {
            Some(process) => process.wait_for_exit(timeout).await,
            None => true,
        };
        if !finished {
            self.stop().await?;
            return Err(SpawnNodeError::Unfinished {
                node: self.label(),
                task: "snapshot dump",
                timeout,
            });
        }
        self.process = None;
        info!(node = %self.id, snapshot = name, "snapshot written");
        Ok(())
    }

    pub async fn load_snapshot(&mut self, name: &str) -> Result<(), SpawnNodeError> {
        self.stop().await?;
        self.start(StartMode::LoadSnapshot {
            name: name.to_owned(),
        })
        .await?;
        self.wait_live(timeouts::node_startup_timeout()).await
    }

    /// Fetches and caches the p2p node id.
    pub async fn refresh_peer_id(&mut self) -> Result<&str, CommunicationError> {
        let info = self.api.network_info().await?;
        Ok(self.peer_id.insert(info.node_id).as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_modes_render_node_flags() {
        assert!(StartMode::Fresh.args().is_empty());
        assert_eq!(
            StartMode::Replay {
                block_log: None,
                stop_at: Some(120)
            }
            .args(),
            vec!["--force-replay", "--stop-at-block=120"]
        );
        let dump = StartMode::DumpSnapshot {
            name: "fork".to_owned(),
        };
        assert!(dump.exits_when_done());
        assert_eq!(dump.args()[0], "--dump-snapshot=fork");
    }
}
