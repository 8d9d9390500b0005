//! Fork scenario primitives: block logs, convergence conditions, the
//! driver and the background workload runner.

pub mod conditions;
pub mod driver;
mod errors;
pub mod log;
pub mod runtime;
pub mod signal;
pub mod workload;

pub use conditions::{
    ConvergenceCondition, head_true_condition, lib_custom_condition, lib_true_condition,
};
pub use driver::{ForkScenarioDriver, PollPolicy, ScenarioPhase};
pub use errors::{ScenarioError, ScenarioTimeoutError};
pub use log::{BlockSample, LibRegression, LogState, NodeLog};
pub use runtime::{WorkloadError, WorkloadRunner};
pub use signal::{BreakCounter, StopSignal};
pub use workload::{Workload, WorkloadContext};

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;
