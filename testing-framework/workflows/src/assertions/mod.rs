mod history;
mod progress;

pub use history::{OpFingerprint, assert_no_duplicate_virtual_ops, fingerprints};
pub use progress::{assert_lib_monotonic, assert_progressed};
use forknet_core::nodes::CommunicationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("{node} reports virtual op {op} more than once")]
    Duplicate { node: String, op: String },
    #[error("virtual op history diverges:\n{diff}")]
    Diverged { diff: String },
    #[error("{label}: LIB went from {previous} to {current} at sample {index}")]
    LibRegressed {
        label: String,
        index: usize,
        previous: u64,
        current: u64,
    },
    #[error("{label}: {what} did not increase ({before} -> {after})")]
    NoProgress {
        label: String,
        what: &'static str,
        before: String,
        after: String,
    },
    #[error("failed to encode {kind} of block {block}: {source}")]
    Encode {
        kind: String,
        block: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read virtual ops from {node}: {source}")]
    History {
        node: String,
        #[source]
        source: CommunicationError,
    },
}
