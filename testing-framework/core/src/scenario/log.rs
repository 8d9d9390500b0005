use std::fmt;

use tokio::time::Instant;

use crate::nodes::{CommunicationError, NodeApi, NodeHandle};

/// Head and last irreversible block reported by a node at one poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSample {
    pub at: Instant,
    pub head_block_number: u64,
    pub last_irreversible_block_num: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LibRegression {
    /// Index of the sample that went backwards.
    pub index: usize,
    pub previous: u64,
    pub current: u64,
}

/// Snapshot of a log for error reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogState {
    pub label: String,
    pub head: Option<u64>,
    pub lib: Option<u64>,
    pub samples: usize,
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: Option<u64>| value.map_or_else(|| "-".to_owned(), |v| v.to_string());
        write!(
            f,
            "{}: head={} lib={} samples={}",
            self.label,
            show(self.head),
            show(self.lib),
            self.samples
        )
    }
}

/// Samples of one node, appended by the polling loop that owns the log.
pub struct NodeLog {
    label: String,
    api: NodeApi,
    samples: Vec<BlockSample>,
}

impl NodeLog {
    #[must_use]
    pub fn new(label: impl Into<String>, api: NodeApi) -> Self {
        Self {
            label: label.into(),
            api,
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn for_node(node: &NodeHandle) -> Self {
        Self::new(node.label(), node.api().clone())
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn api(&self) -> &NodeApi {
        &self.api
    }

    #[must_use]
    pub fn samples(&self) -> &[BlockSample] {
        &self.samples
    }

    #[must_use]
    pub fn last_sample(&self) -> Option<&BlockSample> {
        self.samples.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Queries the node once and appends the result.
    pub async fn sample(&mut self) -> Result<BlockSample, CommunicationError> {
        let props = self.api.dynamic_global_properties().await?;
        Ok(self.record(props.head_block_number, props.last_irreversible_block_num))
    }

    pub fn record(&mut self, head_block_number: u64, last_irreversible_block_num: u64) -> BlockSample {
        let sample = BlockSample {
            at: Instant::now(),
            head_block_number,
            last_irreversible_block_num,
        };
        self.samples.push(sample);
        sample
    }

    /// Every place where the LIB went down between consecutive samples.
    #[must_use]
    pub fn lib_regressions(&self) -> Vec<LibRegression> {
        self.samples
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1].last_irreversible_block_num < pair[0].last_irreversible_block_num)
            .map(|(index, pair)| LibRegression {
                index: index + 1,
                previous: pair[0].last_irreversible_block_num,
                current: pair[1].last_irreversible_block_num,
            })
            .collect()
    }

    #[must_use]
    pub fn state(&self) -> LogState {
        let last = self.last_sample();
        LogState {
            label: self.label.clone(),
            head: last.map(|s| s.head_block_number),
            lib: last.map(|s| s.last_irreversible_block_num),
            samples: self.samples.len(),
        }
    }
}

/// Log whose node never answers, for tests that only record samples.
#[cfg(test)]
pub(crate) fn detached_log(label: &str) -> NodeLog {
    NodeLog::new(label, NodeApi::new(std::sync::Arc::new(tests::Unreachable)))
}
