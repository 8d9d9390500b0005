use std::{process::Child, time::Duration};

use async_trait::async_trait;
use forknet_core::nodes::{
    NodeProcess,
    common::{
        lifecycle::{interrupt_child, is_running, kill_child, wait_for_exit},
        node::SpawnNodeError,
    },
};
use tracing::{debug, warn};

/// A node or wallet binary running as a child of the test process. The
/// child is killed when the handle drops.
pub struct LocalProcess {
    label: String,
    child: Child,
    stop_grace: Duration,
}

impl LocalProcess {
    pub(crate) fn new(label: impl Into<String>, child: Child, stop_grace: Duration) -> Self {
        Self {
            label: label.into(),
            child,
            stop_grace,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl NodeProcess for LocalProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn is_running(&mut self) -> bool {
        is_running(&mut self.child)
    }

    async fn stop(&mut self) -> Result<(), SpawnNodeError> {
        if !is_running(&mut self.child) {
            debug!(process = %self.label, "process already exited");
            return Ok(());
        }
        if !interrupt_child(&mut self.child, self.stop_grace).await {
            warn!(process = %self.label, "process was killed instead of shutting down");
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        wait_for_exit(&mut self.child, timeout).await
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        if is_running(&mut self.child) {
            kill_child(&mut self.child);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    fn sleeper(secs: u64) -> LocalProcess {
        let child = Command::new("sleep")
            .arg(secs.to_string())
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        LocalProcess::new("sleeper", child, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn stop_interrupts_the_child() {
        let mut process = sleeper(60);
        assert!(process.is_running());

        process.stop().await.unwrap();

        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn short_lived_child_exits_on_its_own() {
        let mut process = sleeper(0);

        assert!(process.wait_for_exit(Duration::from_secs(10)).await);
        process.stop().await.unwrap();
    }
}
