use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operational snapshot of a scheduler, for dashboards and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Actions handed to a worker thread (or run synchronously).
    pub tasks_started: u64,
    /// Actions that ran to completion.
    pub tasks_completed: u64,
    /// Actions that finished with a failure forwarded to the exception sink.
    pub tasks_failed: u64,
    /// Tasks whose terminal state was `Canceled`.
    pub tasks_canceled: u64,
    /// Rolling average action duration over completed and failed runs.
    pub avg_action_duration: Duration,
    /// Completion time of the most recent run.
    pub last_completed: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub(crate) fn record_started(&mut self) {
        self.tasks_started += 1;
    }

    /// Record a finished action run and fold its duration into the
    /// rolling average.
    pub(crate) fn record_run(&mut self, duration: Duration, failed: bool) {
        if failed {
            self.tasks_failed += 1;
        } else {
            self.tasks_completed += 1;
        }
        self.last_completed = Some(Utc::now());

        let count = self.tasks_completed + self.tasks_failed;
        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_action_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_action_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub(crate) fn record_canceled(&mut self) {
        self.tasks_canceled += 1;
    }
}
