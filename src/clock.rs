use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logical clock advanced by ingested data.
///
/// Tracks the latest point timestamp seen by any table. Never moves backwards,
/// regardless of the order in which tables advance it.
#[derive(Debug, Default)]
pub struct LogicalClock {
    latest: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock to `ts` if that is later than the current reading.
    #[inline]
    pub fn advance(&self, ts: Timestamp) {
        self.latest.fetch_max(ts, Ordering::AcqRel);
    }

    #[inline]
    pub fn now(&self) -> Timestamp {
        self.latest.load(Ordering::Acquire)
    }
}
