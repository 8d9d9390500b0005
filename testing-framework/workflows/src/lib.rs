pub mod assertions;
pub mod bootstrap;
pub mod builder;
pub mod fork;
pub mod workloads;

pub use assertions::{
    ConvergenceError, assert_lib_monotonic, assert_no_duplicate_virtual_ops, assert_progressed,
};
pub use bootstrap::{BootstrapError, WitnessBootstrap};
pub use builder::{BuilderInputError, ForkScenarioBuilder};
pub use fork::{ForkBlocks, ForkReport, ForkScenario, ForkScenarioError};
pub use workloads::{PartitionFlapping, TransactionLoad};
