use std::time::Duration;

use serde::Serialize;

/// Default polling interval table: a single 200 ms entry.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(200);

/// Ordered table mapping "missed notification cycles" to a poll delay.
///
/// Index `i` gives the delay after `i` missed cycles; the last entry repeats
/// for every index beyond the table. A decaying table such as
/// `[200, 200, 200, 500, 500, 1000]` (milliseconds) starts with frequent
/// checks and backs off for long-running work, bounding client chatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingIntervals(Vec<Duration>);

impl Default for PollingIntervals {
    fn default() -> Self {
        Self(vec![DEFAULT_POLLING_INTERVAL])
    }
}

impl PollingIntervals {
    /// Build a table from the given durations; empty input resets to the
    /// default table.
    pub fn new(intervals: impl Into<Vec<Duration>>) -> Self {
        let intervals = intervals.into();
        if intervals.is_empty() {
            Self::default()
        } else {
            Self(intervals)
        }
    }

    /// Delay to use after `missed` notification cycles.
    pub fn interval_for(&self, missed: u32) -> Duration {
        let index = (missed as usize).min(self.0.len() - 1);
        self.0[index]
    }

    pub fn as_slice(&self) -> &[Duration] {
        &self.0
    }
}
