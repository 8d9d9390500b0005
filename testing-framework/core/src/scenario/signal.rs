use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Flag shared by every worker of a run; once raised it stays raised.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Counter that workers bump until it reaches its threshold.
#[derive(Clone, Debug)]
pub struct BreakCounter {
    value: Arc<AtomicU64>,
    threshold: u64,
}

impl BreakCounter {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
            threshold,
        }
    }

    /// Counter that never trips.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    /// Returns the value after the increment.
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn threshold(&self) -> u64 {
        self.threshold
    }

    #[must_use]
    pub fn reached(&self) -> bool {
        self.value() >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let stop = StopSignal::new();
        let worker = stop.clone();
        stop.raise();
        assert!(worker.is_raised());

        let counter = BreakCounter::new(3);
        let other = counter.clone();
        counter.increment();
        assert_eq!(other.increment(), 2);
        assert!(!counter.reached());
        other.increment();
        assert!(counter.reached());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let counter = BreakCounter::new(4_000);
        let tasks = (0..4)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    for _ in 0..1_000 {
                        counter.increment();
                    }
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.value(), 4_000);
        assert!(counter.reached());
    }
}
