use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use thiserror::Error;
use tokio::{task::JoinSet, time::timeout};
use tracing::{debug, info, warn};

use crate::scenario::{
    DynError,
    workload::{Workload, WorkloadContext},
};

type WorkloadOutcome = Result<(), WorkloadError>;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: DynError,
    },
    #[error("workload '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
    #[error("workload task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Background workloads of one scenario run, sharing one
/// [`WorkloadContext`].
pub struct WorkloadRunner {
    context: WorkloadContext,
    workloads: JoinSet<WorkloadOutcome>,
}

impl WorkloadRunner {
    #[must_use]
    pub fn new(context: WorkloadContext) -> Self {
        Self {
            context,
            workloads: JoinSet::new(),
        }
    }

    #[must_use]
    pub const fn context(&self) -> &WorkloadContext {
        &self.context
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// Starts `workload` in its own task. Panics become
    /// [`WorkloadError::Panicked`].
    pub fn spawn(&mut self, workload: Arc<dyn Workload>) {
        let ctx = self.context.clone();
        info!(workload = workload.name(), "spawning workload");

        self.workloads.spawn(async move {
            let name = workload.name().to_owned();
            let outcome = AssertUnwindSafe(async { workload.start(&ctx).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(workload = %name, "workload finished");
                    Ok(())
                }
                Ok(Err(source)) => Err(WorkloadError::Failed { name, source }),
                Err(panic) => Err(WorkloadError::Panicked {
                    name,
                    message: panic_message(panic),
                }),
            }
        });
    }

    /// Polls workload tasks until `duration` elapses, every task finished,
    /// or one reports an error. Returns true when the timer fired.
    pub async fn run_until(&mut self, duration: Duration) -> Result<bool, WorkloadError> {
        let workloads = &mut self.workloads;
        let run_future = async {
            while let Some(result) = workloads.join_next().await {
                map_join_result(result)?;
            }
            Ok::<(), WorkloadError>(())
        };

        timeout(duration, run_future)
            .await
            .map_or(Ok(true), |result| {
                result?;
                Ok(false)
            })
    }

    /// Raises the stop signal, gives workloads `grace` to wind down, then
    /// aborts and drains whatever is left. Reports the first failure.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), WorkloadError> {
        self.context.stop.raise();
        let mut first_error = None;

        let workloads = &mut self.workloads;
        let _ = timeout(grace, async {
            while let Some(result) = workloads.join_next().await {
                if let Err(err) = map_join_result(result) {
                    warn!(error = %err, "workload ended with an error");
                    first_error.get_or_insert(err);
                }
            }
        })
        .await;

        if !self.workloads.is_empty() {
            warn!(
                remaining = self.workloads.len(),
                "aborting workloads that ignored the stop signal"
            );
        }
        self.workloads.abort_all();
        while let Some(result) = self.workloads.join_next().await {
            if let Err(err) = map_join_result(result) {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Tolerates cancellation since the runner aborts unfinished tasks itself.
fn map_join_result(result: Result<WorkloadOutcome, tokio::task::JoinError>) -> WorkloadOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_cancelled() => Ok(()),
        Err(join_err) => Err(WorkloadError::Join(join_err)),
    }
}

/// Attempts to turn a panic payload into a readable string for diagnostics.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}

impl Drop for WorkloadRunner {
    fn drop(&mut self) {
        self.context.stop.raise();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::scenario::signal::{BreakCounter, StopSignal};

    /// Bumps the counter once per tick until told to stop.
    struct Ticker;

    #[async_trait]
    impl Workload for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }

        async fn start(&self, ctx: &WorkloadContext) -> Result<(), DynError> {
            while !ctx.should_stop() {
                ctx.counter.increment();
                sleep(Duration::from_secs(1)).await;
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Workload for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn start(&self, _ctx: &WorkloadContext) -> Result<(), DynError> {
            sleep(Duration::from_secs(2)).await;
            Err("broadcast rejected".into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Workload for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn start(&self, _ctx: &WorkloadContext) -> Result<(), DynError> {
            panic!("worker blew up");
        }
    }

    /// Never looks at the stop signal.
    struct Stubborn;

    #[async_trait]
    impl Workload for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn start(&self, _ctx: &WorkloadContext) -> Result<(), DynError> {
            sleep(Duration::from_secs(3_600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn workloads_stop_together_on_signal() {
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        runner.spawn(Arc::new(Ticker));
        runner.spawn(Arc::new(Ticker));

        assert!(runner.run_until(Duration::from_secs(5)).await.unwrap());
        runner.stop(Duration::from_secs(5)).await.unwrap();

        assert!(runner.is_empty());
        assert!(runner.context().stop.is_raised());
        assert!(runner.context().counter.value() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_threshold_ends_workloads() {
        let context = WorkloadContext::new(StopSignal::new(), BreakCounter::new(6));
        let mut runner = WorkloadRunner::new(context);
        runner.spawn(Arc::new(Ticker));
        runner.spawn(Arc::new(Ticker));

        assert!(!runner.run_until(Duration::from_secs(60)).await.unwrap());
        assert!(runner.context().counter.reached());
        assert!(!runner.context().stop.is_raised());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_surfaces_with_workload_name() {
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        runner.spawn(Arc::new(Ticker));
        runner.spawn(Arc::new(Failing));

        let err = runner.run_until(Duration::from_secs(60)).await.unwrap_err();

        assert!(matches!(err, WorkloadError::Failed { ref name, .. } if name == "failing"));
        runner.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn panics_become_errors() {
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        runner.spawn(Arc::new(Panicking));

        let err = runner.run_until(Duration::from_secs(1)).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "workload 'panicking' panicked: worker blew up"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_workloads_ignoring_the_signal() {
        let mut runner = WorkloadRunner::new(WorkloadContext::default());
        runner.spawn(Arc::new(Stubborn));
        let started = tokio::time::Instant::now();

        runner.stop(Duration::from_secs(2)).await.unwrap();

        assert!(runner.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3_600));
    }
}
