use std::sync::atomic::{AtomicU64, Ordering};

/// Number of failures between two diagnostic reports from the same loop.
pub const FAILURE_REPORT_INTERVAL: u64 = 1024;

/// Per-loop failure counter. Wraps on overflow and is never reset, so a
/// restarted worker keeps reporting on the same cadence.
#[derive(Debug, Default)]
pub struct FailureCounter {
    count: AtomicU64,
}

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure. Returns the new count when it is due a report.
    pub fn record(&self) -> Option<u64> {
        let count = self.count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        (count != 0 && count % FAILURE_REPORT_INTERVAL == 0).then_some(count)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
