use std::time::Duration;

use rand::{Rng as _, thread_rng};

/// Uniform delay in `[min, max]`; `min` when the range is empty.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let spread = (max - min).as_secs_f64();
    let offset = thread_rng().gen_range(0.0..=spread);
    min.checked_add(Duration::from_secs_f64(offset))
        .unwrap_or(max)
        .min(max)
}
