use std::{collections::BTreeSet, fmt, ops::Range};

use forknet_core::nodes::{NodeApi, api_client::VirtualOpRecord};
use sha2::{Digest as _, Sha256};
use tracing::info;

use super::ConvergenceError;

/// Identity of a virtual op for comparisons across nodes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpFingerprint {
    pub block: u64,
    /// Position among the ops of the same block.
    pub index: usize,
    pub kind: String,
    /// Hex SHA-256 of the JSON encoded operation.
    pub payload_hash: String,
}

impl fmt::Display for OpFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.payload_hash.get(..12).unwrap_or(&self.payload_hash);
        write!(f, "#{}/{} {} {short}", self.block, self.index, self.kind)
    }
}

/// Fingerprints of `ops`, which must be in node order.
pub fn fingerprints(ops: &[VirtualOpRecord]) -> Result<Vec<OpFingerprint>, ConvergenceError> {
    let mut result = Vec::with_capacity(ops.len());
    let mut current_block = None;
    let mut index = 0;
    for op in ops {
        if current_block != Some(op.block) {
            current_block = Some(op.block);
            index = 0;
        }
        let encoded = serde_json::to_vec(&op.op).map_err(|source| ConvergenceError::Encode {
            block: op.block,
            kind: op.op.kind.clone(),
            source,
        })?;
        result.push(OpFingerprint {
            block: op.block,
            index,
            kind: op.op.kind.clone(),
            payload_hash: hex::encode(Sha256::digest(&encoded)),
        });
        index += 1;
    }
    Ok(result)
}

/// Reads the virtual ops of `blocks` from both nodes and fails if either
/// history repeats an op or the two histories differ.
pub async fn assert_no_duplicate_virtual_ops(
    left: &NodeApi,
    right: &NodeApi,
    blocks: Range<u64>,
) -> Result<(), ConvergenceError> {
    let left_ops = history(left, &blocks).await?;
    let right_ops = history(right, &blocks).await?;

    check_unique(&left.endpoint(), &left_ops)?;
    check_unique(&right.endpoint(), &right_ops)?;
    if let Some(diff) = first_mismatch(&left.endpoint(), &left_ops, &right.endpoint(), &right_ops) {
        return Err(ConvergenceError::Diverged { diff });
    }

    info!(
        left = %left.endpoint(),
        right = %right.endpoint(),
        begin = blocks.start,
        end = blocks.end,
        ops = left_ops.len(),
        "virtual op histories match"
    );
    Ok(())
}

async fn history(api: &NodeApi, blocks: &Range<u64>) -> Result<Vec<OpFingerprint>, ConvergenceError> {
    let ops = api
        .virtual_ops_in_range(blocks.start, blocks.end)
        .await
        .map_err(|source| ConvergenceError::History {
            node: api.endpoint(),
            source,
        })?;
    fingerprints(&ops)
}

fn check_unique(node: &str, ops: &[OpFingerprint]) -> Result<(), ConvergenceError> {
    let mut seen = BTreeSet::new();
    for op in ops {
        if !seen.insert((op.block, &op.kind, &op.payload_hash)) {
            return Err(ConvergenceError::Duplicate {
                node: node.to_owned(),
                op: op.to_string(),
            });
        }
    }
    Ok(())
}

/// Diff of the first block whose ops differ.
fn first_mismatch(
    left_label: &str,
    left: &[OpFingerprint],
    right_label: &str,
    right: &[OpFingerprint],
) -> Option<String> {
    let position = left
        .iter()
        .zip(right)
        .position(|(l, r)| l != r)
        .or_else(|| (left.len() != right.len()).then(|| left.len().min(right.len())))?;

    let block = match (left.get(position), right.get(position)) {
        (Some(l), Some(r)) => l.block.min(r.block),
        (Some(op), None) | (None, Some(op)) => op.block,
        (None, None) => return None,
    };
    let in_block = |ops: &[OpFingerprint]| {
        ops.iter()
            .filter(|op| op.block == block)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    };

    let mut diff = format!("first mismatch in blocks [{block}, {})\n", block + 1);
    diff.push_str(&format!("--- {left_label}\n+++ {right_label}\n"));
    let (left_ops, right_ops) = (in_block(left), in_block(right));
    for line in &left_ops {
        if !right_ops.contains(line) {
            diff.push_str(&format!("- {line}\n"));
        }
    }
    for line in &right_ops {
        if !left_ops.contains(line) {
            diff.push_str(&format!("+ {line}\n"));
        }
    }
    Some(diff)
}

#[cfg(test)]
mod tests {
    use forknet_core::nodes::api_client::VirtualOperation;
    use serde_json::{Value, json};
    use sha2::Digest as _;

    use super::*;

    fn op(block: u64, kind: &str, value: Value) -> VirtualOpRecord {
        VirtualOpRecord {
            trx_id: String::new(),
            block,
            trx_in_block: -1,
            op_in_trx: 0,
            virtual_op: true,
            timestamp: String::new(),
            op: VirtualOperation {
                kind: kind.to_owned(),
                value,
            },
            operation_id: Value::Null,
        }
    }

    #[test]
    fn indices_restart_per_block() {
        let prints = fingerprints(&[
            op(4, "producer_reward_operation", json!({"producer": "a"})),
            op(4, "fill_vesting_withdraw_operation", json!({})),
            op(5, "producer_reward_operation", json!({"producer": "b"})),
        ])
        .unwrap();

        assert_eq!(
            prints.iter().map(|p| (p.block, p.index)).collect::<Vec<_>>(),
            vec![(4, 0), (4, 1), (5, 0)]
        );
        assert_eq!(prints[0].payload_hash.len(), 64);
        assert_ne!(prints[0].payload_hash, prints[2].payload_hash);
    }

    #[test]
    fn payload_hash_ignores_bookkeeping_fields() {
        let mut a = op(7, "producer_reward_operation", json!({"producer": "a"}));
        let b = a.clone();
        a.operation_id = json!("123");
        a.timestamp = "2024-01-01T00:00:21".to_owned();

        assert_eq!(fingerprints(&[a]).unwrap(), fingerprints(&[b]).unwrap());
    }

    #[test]
    fn payload_hash_covers_type_and_value() {
        let record = op(3, "producer_reward_operation", json!({"producer": "a"}));

        let prints = fingerprints(std::slice::from_ref(&record)).unwrap();

        let expected = Sha256::digest(
            br#"{"type":"producer_reward_operation","value":{"producer":"a"}}"#,
        );
        assert_eq!(prints[0].payload_hash, hex::encode(expected));
        assert_eq!(prints[0].kind, "producer_reward_operation");
    }

    #[test]
    fn repeated_op_is_a_duplicate() {
        let prints = fingerprints(&[
            op(9, "producer_reward_operation", json!({"producer": "a"})),
            op(9, "producer_reward_operation", json!({"producer": "a"})),
        ])
        .unwrap();

        assert!(matches!(
            check_unique("node", &prints),
            Err(ConvergenceError::Duplicate { .. })
        ));
    }

    #[test]
    fn diff_names_the_first_diverging_block() {
        let left = fingerprints(&[
            op(1, "producer_reward_operation", json!({"producer": "a"})),
            op(2, "producer_reward_operation", json!({"producer": "a"})),
        ])
        .unwrap();
        let right = fingerprints(&[
            op(1, "producer_reward_operation", json!({"producer": "a"})),
            op(2, "producer_reward_operation", json!({"producer": "b"})),
        ])
        .unwrap();

        let diff = first_mismatch("left", &left, "right", &right).unwrap();

        assert!(diff.starts_with("first mismatch in blocks [2, 3)"));
        assert_eq!(diff.lines().filter(|l| l.starts_with("- #2/0")).count(), 1);
        assert_eq!(diff.lines().filter(|l| l.starts_with("+ #2/0")).count(), 1);
        assert!(first_mismatch("left", &left, "right", &left).is_none());
    }

    #[test]
    fn missing_tail_is_a_mismatch() {
        let left = fingerprints(&[
            op(1, "producer_reward_operation", json!({})),
            op(2, "producer_reward_operation", json!({})),
        ])
        .unwrap();

        let diff = first_mismatch("left", &left, "right", &left[..1]).unwrap();

        assert!(diff.starts_with("first mismatch in blocks [2, 3)"));
    }
}
