pub mod network;
pub mod orchestrator;
pub mod readiness;
pub mod registry;
pub mod utils;

pub use network::{NetworkTopology, Networks};
pub use orchestrator::{NetworkOrchestrator, OrchestratorError};
pub use registry::{UnknownWitness, WitnessRegistry};
