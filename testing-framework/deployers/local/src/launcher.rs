use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use forknet_config::{constants::NODE_CONFIG_FILENAME, nodes::NodeConfig, timeouts, topology::NodeId};
use forknet_core::nodes::{
    LOGS_PREFIX, LaunchSpec, NodeApi, NodeLauncher, NodeProcess, StartMode,
    common::{
        binary::{BinaryConfig, BinaryResolver},
        node::{ProcessSpec, SpawnNodeError, spawn_process, write_config},
    },
    create_tempdir, persist_tempdir, should_persist_tempdir,
};
use forknet_env as tf_env;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::process::LocalProcess;

pub const NODE_BINARY_NAME: &str = "chaind";
const NODE_FALLBACK_PATH: &str = "target/bin/chaind";
const BLOCK_LOG_DIR: &str = "blockchain";
const BLOCK_LOG_FILE: &str = "block_log";

/// Runs every node as a local process of the chain binary. Each node keeps
/// one data dir across restarts; a fresh start replaces it.
pub struct LocalLauncher {
    node_binary: PathBuf,
    capture_output: bool,
    stop_grace: Duration,
    data_dirs: Mutex<HashMap<NodeId, TempDir>>,
}

impl LocalLauncher {
    /// Resolves the node binary from `FORKNET_NODE_BIN`, then `PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        let binary = BinaryResolver::resolve_path(&BinaryConfig {
            env_override: tf_env::forknet_node_bin(),
            env_var: "FORKNET_NODE_BIN",
            binary_name: NODE_BINARY_NAME,
            fallback_path: NODE_FALLBACK_PATH,
        });
        Self::with_binary(binary)
    }

    #[must_use]
    pub fn with_binary(node_binary: PathBuf) -> Self {
        Self {
            node_binary,
            capture_output: !tf_env::debug_tracing(),
            stop_grace: timeouts::node_shutdown_timeout(),
            data_dirs: Mutex::new(HashMap::new()),
        }
    }

    /// Inherit stdout/stderr instead of writing them into the data dir.
    #[must_use]
    pub const fn with_inherited_output(mut self) -> Self {
        self.capture_output = false;
        self
    }

    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    #[must_use]
    pub fn node_binary(&self) -> &Path {
        &self.node_binary
    }

    /// Data dir of `id`, if it was launched at least once.
    #[must_use]
    pub fn data_dir(&self, id: NodeId) -> Option<PathBuf> {
        self.lock_dirs().get(&id).map(|dir| dir.path().to_path_buf())
    }

    fn lock_dirs(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, TempDir>> {
        self.data_dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn data_dir_for(&self, id: NodeId, mode: &StartMode) -> Result<PathBuf, SpawnNodeError> {
        let mut dirs = self.lock_dirs();
        if *mode == StartMode::Fresh || !dirs.contains_key(&id) {
            let dir = create_tempdir().map_err(|source| SpawnNodeError::TempDir { source })?;
            debug!(node = %id, path = %dir.path().display(), "created node data dir");
            if let Some(previous) = dirs.insert(id, dir) {
                keep_or_drop(previous, &id.to_string());
            }
        }
        dirs.get(&id)
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| SpawnNodeError::Launcher {
                node: id.to_string(),
                message: "data dir disappeared".to_owned(),
            })
    }
}

impl Drop for LocalLauncher {
    fn drop(&mut self) {
        let dirs = std::mem::take(
            self.data_dirs
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for (id, dir) in dirs {
            keep_or_drop(dir, &id.to_string());
        }
    }
}

fn keep_or_drop(dir: TempDir, label: &str) {
    if should_persist_tempdir() {
        let _ = persist_tempdir(dir, label);
    }
}

/// Writes the config and, for a replay, the block log into `data_dir`.
pub(crate) fn prepare_data_dir(
    data_dir: &Path,
    config: &NodeConfig,
    mode: &StartMode,
) -> Result<(), SpawnNodeError> {
    write_config(&data_dir.join(NODE_CONFIG_FILENAME), &config.render())?;

    if let StartMode::Replay {
        block_log: Some(source),
        ..
    } = mode
    {
        let target_dir = data_dir.join(BLOCK_LOG_DIR);
        fs::create_dir_all(&target_dir).map_err(|source| SpawnNodeError::Prepare {
            path: target_dir.clone(),
            source,
        })?;
        let target = target_dir.join(BLOCK_LOG_FILE);
        fs::copy(source, &target).map_err(|source| SpawnNodeError::Prepare {
            path: target.clone(),
            source,
        })?;
        debug!(from = %source.display(), to = %target.display(), "copied block log");
    }
    Ok(())
}

pub(crate) fn node_args(data_dir: &Path, mode: &StartMode) -> Vec<String> {
    let mut args = vec!["-d".to_owned(), data_dir.display().to_string()];
    args.extend(mode.args());
    args
}

#[async_trait]
impl NodeLauncher for LocalLauncher {
    fn api(&self, _id: NodeId, config: &NodeConfig) -> NodeApi {
        NodeApi::http(config.ports.http_endpoint())
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn NodeProcess>, SpawnNodeError> {
        let label = spec.id.to_string();
        let data_dir = self.data_dir_for(spec.id, &spec.mode)?;
        prepare_data_dir(&data_dir, &spec.config, &spec.mode)?;

        let child = spawn_process(&ProcessSpec {
            binary: &self.node_binary,
            args: node_args(&data_dir, &spec.mode),
            data_dir: &data_dir,
            env: &spec.env,
            log_prefix: LOGS_PREFIX,
            capture_output: self.capture_output,
        })?;
        info!(
            node = %label,
            pid = child.id(),
            mode = ?spec.mode,
            http = %spec.config.ports.http_endpoint(),
            "node process started"
        );

        Ok(Box::new(LocalProcess::new(label, child, self.stop_grace)))
    }
}
