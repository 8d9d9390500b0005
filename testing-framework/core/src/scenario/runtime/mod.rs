mod runner;

pub use runner::{WorkloadError, WorkloadRunner};
