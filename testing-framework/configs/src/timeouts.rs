use std::{env, time::Duration};

use forknet_env as tf_env;

use crate::{adjust_attempts, adjust_timeout};

pub const BLOCK_INTERVAL_MS: u64 = 3_000;
pub const POLLS_PER_BLOCK: u32 = 3;
/// Witnesses scheduled per production round.
pub const WITNESSES_PER_ROUND: u32 = 21;
/// Longest run of slots a side holding two thirds of a round can miss:
/// the other third at the end of one round and again at the start of the
/// next.
pub const MAX_MISSED_SLOTS: u32 = 2 * (WITNESSES_PER_ROUND / 3);
/// Consecutive polls without head progress before a wait gives up.
pub const STALL_POLLS: u32 = POLLS_PER_BLOCK * (MAX_MISSED_SLOTS + 1);
pub const CONVERGENCE_ATTEMPTS: u32 = 100;
pub const NODE_STARTUP_SECS: u64 = 120;
pub const NODE_SHUTDOWN_SECS: u64 = 30;
pub const PEER_READINESS_SECS: u64 = 60;

fn env_duration(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

pub fn block_interval() -> Duration {
    Duration::from_millis(tf_env::forknet_block_interval_ms().unwrap_or(BLOCK_INTERVAL_MS))
}

pub fn poll_interval() -> Duration {
    block_interval() / POLLS_PER_BLOCK
}

pub fn stall_polls() -> u32 {
    adjust_attempts(tf_env::forknet_stall_polls().unwrap_or(STALL_POLLS))
}

pub fn convergence_attempts() -> u32 {
    adjust_attempts(tf_env::forknet_convergence_attempts().unwrap_or(CONVERGENCE_ATTEMPTS))
}

pub fn node_startup_timeout() -> Duration {
    adjust_timeout(Duration::from_secs(
        tf_env::forknet_node_startup_secs().unwrap_or(NODE_STARTUP_SECS),
    ))
}

pub fn node_shutdown_timeout() -> Duration {
    adjust_timeout(env_duration("FORKNET_NODE_SHUTDOWN_SECS", NODE_SHUTDOWN_SECS))
}

pub fn peer_readiness_timeout() -> Duration {
    adjust_timeout(env_duration("FORKNET_PEER_READINESS_SECS", PEER_READINESS_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_window_outlasts_missed_slots() {
        let longest_gap = POLLS_PER_BLOCK * (MAX_MISSED_SLOTS + 1);
        assert_eq!(MAX_MISSED_SLOTS, 14);
        assert!(STALL_POLLS >= longest_gap);
    }
}
