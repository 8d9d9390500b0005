use super::{errors::ScenarioError, log::NodeLog};

/// Every log has samples and all report the same last irreversible block.
#[must_use]
pub fn lib_true_condition(logs: &[&NodeLog]) -> bool {
    identical(logs, |log| {
        log.last_sample()
            .map(|sample| sample.last_irreversible_block_num)
    })
}

/// Every log has samples and all report the same head block.
#[must_use]
pub fn head_true_condition(logs: &[&NodeLog]) -> bool {
    identical(logs, |log| log.last_sample().map(|sample| sample.head_block_number))
}

/// The last irreversible block of `log` is past `floor`.
#[must_use]
pub fn lib_custom_condition(log: &NodeLog, floor: u64) -> bool {
    log.last_sample()
        .is_some_and(|sample| sample.last_irreversible_block_num > floor)
}

fn identical(logs: &[&NodeLog], value: impl Fn(&NodeLog) -> Option<u64>) -> bool {
    let mut values = logs.iter().map(|log| value(log));
    let Some(Some(first)) = values.next() else {
        return false;
    };
    values.all(|v| v == Some(first))
}

/// Predicate `wait_for_final_block` polls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceCondition {
    IdenticalLib,
    IdenticalHead,
    /// Log at this index (of all logs) has its LIB past `floor`.
    LibAdvancedPast { log: usize, floor: u64 },
}

impl ConvergenceCondition {
    /// Evaluates over `logs`; identity conditions only look at `converge`.
    pub fn holds(&self, logs: &[NodeLog], converge: &[usize]) -> Result<bool, ScenarioError> {
        match *self {
            Self::IdenticalLib => Ok(lib_true_condition(&select(logs, converge)?)),
            Self::IdenticalHead => Ok(head_true_condition(&select(logs, converge)?)),
            Self::LibAdvancedPast { log, floor } => {
                Ok(lib_custom_condition(pick(logs, log)?, floor))
            }
        }
    }

    #[must_use]
    pub fn describe(&self, logs: &[NodeLog], converge: &[usize]) -> String {
        let labels = || {
            converge
                .iter()
                .filter_map(|idx| logs.get(*idx))
                .map(NodeLog::label)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match *self {
            Self::IdenticalLib => format!("identical LIB on [{}]", labels()),
            Self::IdenticalHead => format!("identical head on [{}]", labels()),
            Self::LibAdvancedPast { log, floor } => format!(
                "LIB of {} past {floor}",
                logs.get(log).map_or("<missing log>", NodeLog::label)
            ),
        }
    }
}

pub(crate) fn pick(logs: &[NodeLog], index: usize) -> Result<&NodeLog, ScenarioError> {
    logs.get(index).ok_or(ScenarioError::UnknownLog {
        index,
        len: logs.len(),
    })
}

pub(crate) fn select<'a>(
    logs: &'a [NodeLog],
    indices: &[usize],
) -> Result<Vec<&'a NodeLog>, ScenarioError> {
    indices.iter().map(|idx| pick(logs, *idx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::log::detached_log;

    fn logs(samples: &[&[(u64, u64)]]) -> Vec<NodeLog> {
        samples
            .iter()
            .enumerate()
            .map(|(idx, points)| {
                let mut log = detached_log(&format!("node{idx}"));
                for (head, lib) in *points {
                    log.record(*head, *lib);
                }
                log
            })
            .collect()
    }

    #[test]
    fn identical_lib_needs_samples_everywhere() {
        let logs = logs(&[&[(10, 8)], &[]]);

        assert!(!lib_true_condition(&[&logs[0], &logs[1]]));
        assert!(lib_true_condition(&[&logs[0]]));
        assert!(!lib_true_condition(&[]));
    }

    #[test]
    fn identical_lib_compares_latest_samples() {
        let logs = logs(&[&[(10, 7), (12, 9)], &[(11, 9)], &[(12, 8)]]);

        assert!(
            ConvergenceCondition::IdenticalLib
                .holds(&logs, &[0, 1])
                .unwrap()
        );
        assert!(
            !ConvergenceCondition::IdenticalLib
                .holds(&logs, &[0, 1, 2])
                .unwrap()
        );
        assert!(
            !ConvergenceCondition::IdenticalHead
                .holds(&logs, &[0, 1])
                .unwrap()
        );
    }

    #[test]
    fn custom_condition_is_strict() {
        let logs = logs(&[&[(30, 20)]]);

        assert!(lib_custom_condition(&logs[0], 19));
        assert!(!lib_custom_condition(&logs[0], 20));
        assert!(matches!(
            ConvergenceCondition::LibAdvancedPast { log: 3, floor: 0 }.holds(&logs, &[]),
            Err(ScenarioError::UnknownLog { index: 3, len: 1 })
        ));
    }
}
