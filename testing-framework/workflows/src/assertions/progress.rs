use forknet_core::scenario::{LogState, NodeLog};

use super::ConvergenceError;

/// Fails on the first log whose LIB ever went down.
pub fn assert_lib_monotonic(logs: &[NodeLog]) -> Result<(), ConvergenceError> {
    for log in logs {
        if let Some(regression) = log.lib_regressions().first() {
            return Err(ConvergenceError::LibRegressed {
                label: log.label().to_owned(),
                index: regression.index,
                previous: regression.previous,
                current: regression.current,
            });
        }
    }
    Ok(())
}

/// Head and LIB of `after` must be strictly above `before`.
pub fn assert_progressed(before: &LogState, after: &LogState) -> Result<(), ConvergenceError> {
    let checks = [
        ("head block number", before.head, after.head),
        ("last irreversible block", before.lib, after.lib),
    ];
    for (what, old, new) in checks {
        let increased = matches!((old, new), (Some(old), Some(new)) if new > old);
        if !increased {
            let show = |v: Option<u64>| v.map_or_else(|| "-".to_owned(), |v| v.to_string());
            return Err(ConvergenceError::NoProgress {
                label: after.label.clone(),
                what,
                before: show(old),
                after: show(new),
            });
        }
    }
    Ok(())
}
