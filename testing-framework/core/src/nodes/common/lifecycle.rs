use std::{
    process::{Child, Command, Stdio},
    time::Duration,
};

use tokio::time;
use tracing::{debug, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// False once the child exited or can no longer be polled.
pub fn is_running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

/// Hard kill; errors mean the process is already gone.
pub fn kill_child(child: &mut Child) {
    debug!(pid = child.id(), "killing child process");
    let _ = child.kill();
    let _ = child.wait();
}

/// Sends SIGINT so the node can flush its state, then kills it if it is
/// still running after `grace`. Returns true on a clean exit.
pub async fn interrupt_child(child: &mut Child, grace: Duration) -> bool {
    let pid = child.id();
    let signalled = Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if !signalled {
        warn!(pid, "failed to deliver SIGINT, killing instead");
        kill_child(child);
        return false;
    }

    if wait_for_exit(child, grace).await {
        return true;
    }

    warn!(pid, grace_secs = grace.as_secs(), "process ignored SIGINT, killing");
    kill_child(child);
    false
}

/// Returns true if the process exited within the timeout, false otherwise.
pub async fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    time::timeout(timeout, async {
        loop {
            if !is_running(child) {
                return;
            }
            time::sleep(EXIT_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok()
}
