use async_trait::async_trait;

use super::{
    DynError,
    signal::{BreakCounter, StopSignal},
};

/// Handles given to every workload of a run.
#[derive(Clone, Debug)]
pub struct WorkloadContext {
    pub stop: StopSignal,
    pub counter: BreakCounter,
}

impl WorkloadContext {
    #[must_use]
    pub const fn new(stop: StopSignal, counter: BreakCounter) -> Self {
        Self { stop, counter }
    }

    /// True once the stop signal is raised or the counter tripped.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.is_raised() || self.counter.reached()
    }
}

impl Default for WorkloadContext {
    fn default() -> Self {
        Self::new(StopSignal::new(), BreakCounter::unbounded())
    }
}

/// Background activity that runs next to the coordinating scenario task.
#[async_trait]
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Runs until [`WorkloadContext::should_stop`] or a fatal error.
    async fn start(&self, ctx: &WorkloadContext) -> Result<(), DynError>;
}
