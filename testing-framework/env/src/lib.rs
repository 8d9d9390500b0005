use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn debug_tracing() -> bool {
    env::var("FORKNET_TESTS_TRACING").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn forknet_log_dir() -> Option<PathBuf> {
    env::var("FORKNET_LOG_DIR").ok().map(PathBuf::from)
}

#[must_use]
pub fn forknet_tests_keep_logs() -> bool {
    env::var("FORKNET_TESTS_KEEP_LOGS").is_ok()
}

#[must_use]
pub fn forknet_node_bin() -> Option<PathBuf> {
    env::var_os("FORKNET_NODE_BIN").map(PathBuf::from)
}

#[must_use]
pub fn forknet_wallet_bin() -> Option<PathBuf> {
    env::var_os("FORKNET_WALLET_BIN").map(PathBuf::from)
}

#[must_use]
pub fn forknet_libfaketime_path() -> Option<PathBuf> {
    env::var_os("FORKNET_LIBFAKETIME_PATH").map(PathBuf::from)
}

#[must_use]
pub fn forknet_init_private_key() -> Option<String> {
    env::var("FORKNET_INIT_PRIVATE_KEY").ok()
}

#[must_use]
pub fn forknet_chain_id() -> Option<String> {
    env::var("FORKNET_CHAIN_ID").ok()
}

#[must_use]
pub fn forknet_block_interval_ms() -> Option<u64> {
    env::var("FORKNET_BLOCK_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn forknet_stall_polls() -> Option<u32> {
    env::var("FORKNET_STALL_POLLS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
}

#[must_use]
pub fn forknet_convergence_attempts() -> Option<u32> {
    env::var("FORKNET_CONVERGENCE_ATTEMPTS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
}

#[must_use]
pub fn forknet_node_startup_secs() -> Option<u64> {
    env::var("FORKNET_NODE_STARTUP_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}
