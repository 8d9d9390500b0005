use std::{ops::Mul as _, sync::LazyLock, time::Duration};

use forknet_env as tf_env;

pub mod constants;
pub mod keys;
pub mod nodes;
pub mod timeouts;
pub mod topology;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(tf_env::slow_test_env);

pub static IS_DEBUG_TRACING: LazyLock<bool> = LazyLock::new(tf_env::debug_tracing);

const SLOW_ENV_TIMEOUT_MULTIPLIER: u32 = 2;

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV {
        d.mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
    } else {
        d
    }
}

/// Same as [`adjust_timeout`] for budgets expressed as attempt counts.
#[must_use]
pub fn adjust_attempts(attempts: u32) -> u32 {
    if *IS_SLOW_TEST_ENV {
        attempts.saturating_mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
    } else {
        attempts
    }
}
