use std::{
    collections::BTreeMap,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::Duration,
};

use tokio::time;
use tracing::{debug, info};

use crate::nodes::{CommunicationError, NodeApi};

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum SpawnNodeError {
    #[error("failed to create node data dir: {source}")]
    TempDir {
        #[source]
        source: io::Error,
    },
    #[error("failed to write node config at {}: {source}", path.display())]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn process '{}': {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{node} did not answer rpc within {timeout:?}: {last_error}")]
    Readiness {
        node: String,
        timeout: Duration,
        last_error: String,
    },
    #[error("{node} exited before becoming ready")]
    Exited { node: String },
    #[error("{node} is already running")]
    AlreadyRunning { node: String },
    #[error("{node} is not running")]
    NotRunning { node: String },
    #[error("{node} did not finish {task} within {timeout:?}")]
    Unfinished {
        node: String,
        task: &'static str,
        timeout: Duration,
    },
    #[error("{node}: {message}")]
    Launcher { node: String, message: String },
}

/// Everything needed to start one process inside its data dir.
pub struct ProcessSpec<'a> {
    pub binary: &'a Path,
    pub args: Vec<String>,
    pub data_dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub log_prefix: &'a str,
    /// Write stdout/stderr to files in the data dir instead of inheriting.
    pub capture_output: bool,
}

pub fn write_config(path: &Path, contents: &str) -> Result<(), SpawnNodeError> {
    fs::write(path, contents).map_err(|source| SpawnNodeError::WriteConfig {
        path: path.to_path_buf(),
        source,
    })
}

pub fn spawn_process(spec: &ProcessSpec<'_>) -> Result<Child, SpawnNodeError> {
    let mut command = Command::new(spec.binary);
    command
        .args(&spec.args)
        .envs(spec.env)
        .current_dir(spec.data_dir)
        .stdin(Stdio::null());

    if spec.capture_output {
        let open = |suffix: &str| {
            let path = spec.data_dir.join(format!("{}.{suffix}", spec.log_prefix));
            File::create(&path).map_err(|source| SpawnNodeError::Prepare { path, source })
        };
        command.stdout(open("stdout")?).stderr(open("stderr")?);
    } else {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    debug!(
        binary = %spec.binary.display(),
        args = ?spec.args,
        dir = %spec.data_dir.display(),
        env = ?spec.env.keys().collect::<Vec<_>>(),
        "spawning process"
    );

    command.spawn().map_err(|source| SpawnNodeError::Spawn {
        binary: spec.binary.to_path_buf(),
        source,
    })
}

/// Polls `get_dynamic_global_properties` until the node answers.
pub async fn wait_until_live(
    api: &NodeApi,
    node: &str,
    timeout: Duration,
) -> Result<(), SpawnNodeError> {
    let mut last_error: Option<CommunicationError> = None;
    let ready = time::timeout(timeout, async {
        loop {
            match api.dynamic_global_properties().await {
                Ok(props) => return props,
                Err(err) => last_error = Some(err),
            }
            time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    })
    .await;

    match ready {
        Ok(props) => {
            info!(node, head = props.head_block_number, "node answers rpc");
            Ok(())
        }
        Err(_) => Err(SpawnNodeError::Readiness {
            node: node.to_owned(),
            timeout,
            last_error: last_error.map_or_else(|| "no response".to_owned(), |e| e.to_string()),
        }),
    }
}
