//! Deferred task execution for UI-bound applications.
//!
//! A [`Scheduler`] runs expensive actions on a bounded worker pool while the
//! single-threaded UI context stays responsive, and delivers results back
//! into that context safely, exactly once. Delivery uses the owner's push
//! channel when one is enabled, and adaptive polling otherwise: the poll
//! cadence starts from the first entry of the interval table and decays as
//! cycles go by without a result. Tasks are cancelled automatically when
//! their owner detaches or navigates away.
//!
//! ```no_run
//! # use viewflow_ui::{Component, PushMode, UiContext};
//! # use viewflow_scheduler::Scheduler;
//! let scheduler = Scheduler::new();
//! let ui = UiContext::new(PushMode::Disabled);
//! let view = Component::attached(&ui);
//!
//! scheduler.register(&view, |task| {
//!     let rows = load_report();
//!     task.push(move |_| {
//!         render(rows);
//!         Ok(())
//!     });
//!     Ok(())
//! });
//! # fn load_report() -> Vec<u32> { Vec::new() }
//! # fn render(_: Vec<u32>) {}
//! ```

pub mod error;
pub mod intervals;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod task;
pub mod worker;

pub use error::TaskError;
pub use intervals::{PollingIntervals, DEFAULT_POLLING_INTERVAL};
pub use manager::{
    ExceptionHandler, Scheduler, TaskState, TaskStateHandler, DEFAULT_POOL_SIZE,
};
pub use metrics::SchedulerMetrics;
pub use task::{AsyncAction, DeliveryMode, Task};
pub use worker::WorkerHandle;
