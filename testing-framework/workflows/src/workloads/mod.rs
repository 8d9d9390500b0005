pub mod partition;
pub mod transaction;
pub mod util;

pub use partition::PartitionFlapping;
pub use transaction::TransactionLoad;
