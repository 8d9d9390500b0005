pub mod description;
pub mod invariants;
pub mod plan;
pub mod witness;

pub use description::{NetworkDescription, NodeCount, TopologyDescription};
pub use invariants::ConfigurationError;
pub use plan::{NetworkId, NetworkPlan, NodeId, NodePlan, NodeRole, TopologyPlan};
pub use witness::{WitnessIdentity, secondary_init_name, witness_name};
