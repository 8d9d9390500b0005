pub mod nodes;
pub mod scenario;
pub mod topology;

pub use forknet_config::{IS_DEBUG_TRACING, adjust_timeout};
