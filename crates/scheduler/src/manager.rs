use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use viewflow_ui::{Component, UiContext, UiState};

use crate::error::TaskError;
use crate::intervals::PollingIntervals;
use crate::metrics::SchedulerMetrics;
use crate::registry::TaskRegistry;
use crate::task::{AsyncAction, Task};

/// Default worker pool size (25 threads).
pub const DEFAULT_POOL_SIZE: usize = 25;

/// Externally observable task state, for wiring loading indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Running,
    Done,
    Canceled,
}

/// Sink for uncaught action failures.
pub type ExceptionHandler = Arc<dyn Fn(&Task, &TaskError) + Send + Sync>;

/// Optional observer of task state transitions.
pub type TaskStateHandler = Arc<dyn Fn(&Task, TaskState) + Send + Sync>;

struct SchedulerInner {
    executor: RwLock<Arc<rayon::ThreadPool>>,
    intervals: RwLock<PollingIntervals>,
    exception_handler: RwLock<ExceptionHandler>,
    state_handler: RwLock<Option<TaskStateHandler>>,
    registry: TaskRegistry,
    metrics: Mutex<SchedulerMetrics>,
}

/// Registration entry point and shared configuration: worker pool, interval
/// table, exception sink, optional state observer.
///
/// Deliberately an explicit value rather than a process-wide singleton:
/// clones share the same pool and registry, and tests construct isolated
/// instances. An application typically keeps one `Scheduler` for its
/// lifetime; there is no teardown path.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use viewflow_ui::{Component, PushMode, UiContext};
/// # use viewflow_scheduler::Scheduler;
/// let scheduler = Scheduler::new();
/// let ui = UiContext::new(PushMode::Automatic);
/// let view = Component::attached(&ui);
///
/// scheduler.register(&view, |task| {
///     let report = expensive_computation();
///     task.push(move |_| {
///         update_view(report);
///         Ok(())
///     });
///     Ok(())
/// });
/// # fn expensive_computation() -> u32 { 0 }
/// # fn update_view(_: u32) {}
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler with the default pool, interval table and
    /// logging exception sink.
    pub fn new() -> Self {
        Self::with_pool_size(DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("Failed to build worker thread pool");
        Self {
            inner: Arc::new(SchedulerInner {
                executor: RwLock::new(Arc::new(pool)),
                intervals: RwLock::new(PollingIntervals::default()),
                exception_handler: RwLock::new(Arc::new(log_exception)),
                state_handler: RwLock::new(None),
                registry: TaskRegistry::new(),
                metrics: Mutex::new(SchedulerMetrics::default()),
            }),
        }
    }

    //--- Registration

    /// Register and start a deferred action against `component`. The action
    /// runs on a pool thread and must not touch UI state directly; results
    /// travel through [`Task::push`].
    ///
    /// If the component is not attached yet, execution is deferred until
    /// attach via a one-shot listener; the returned handle is live either
    /// way. Delivery mode is decided at (possibly deferred) registration:
    /// push when the owner's UI has a push channel, polling otherwise.
    pub fn register<F>(&self, component: &Arc<Component>, action: F) -> Task
    where
        F: FnOnce(&Task) -> Result<(), TaskError> + Send + 'static,
    {
        self.register_with(component, Box::new(action), false)
    }

    /// Like [`Scheduler::register`], but forces polling mode even when a
    /// push channel is available — for updates that must ride a regular
    /// request cycle (e.g. when they need request-scoped resources).
    pub fn register_polling<F>(&self, component: &Arc<Component>, action: F) -> Task
    where
        F: FnOnce(&Task) -> Result<(), TaskError> + Send + 'static,
    {
        self.register_with(component, Box::new(action), true)
    }

    /// Run `action` synchronously on the calling thread under the same API
    /// shape. The returned task is degenerate: `cancel` and `join` are
    /// no-ops and it joins no registry.
    pub fn register_sync<F>(&self, component: &Arc<Component>, action: F) -> Task
    where
        F: FnOnce(&Task) -> Result<(), TaskError>,
    {
        let task = Task::new_sync(self.clone(), component.ui());
        self.record_started();
        let started = Instant::now();
        let result = action(&task);
        match &result {
            Ok(()) => {}
            Err(TaskError::UiDetached(_)) => {
                debug!("sync task {}: UI detached", task.id());
            }
            Err(e) => self.handle_exception(&task, e),
        }
        self.record_run(started.elapsed(), matches!(&result, Err(TaskError::Failed(_))));
        task
    }

    fn register_with(&self, component: &Arc<Component>, action: AsyncAction, force_polling: bool) -> Task {
        let task = Task::new(self.clone());
        match component.ui() {
            Some(ui) => task.register(ui, component, action, force_polling),
            None => {
                let deferred = task.clone();
                let component_ref = Arc::clone(component);
                let registration = component.on_attach_once(move |event| {
                    deferred.register(Arc::clone(&event.ui), &component_ref, action, force_polling);
                });
                // Cancelling before attach releases this and the action
                // never runs.
                task.add_registration(registration);
            }
        }
        task
    }

    //--- Configuration

    /// Replace the interval table; empty input resets to the default.
    /// Not retroactive: in-flight tasks pick it up at their next
    /// recomputation.
    pub fn set_polling_intervals(&self, intervals: impl Into<Vec<Duration>>) {
        *self.inner.intervals.write() = PollingIntervals::new(intervals);
    }

    pub fn polling_intervals(&self) -> PollingIntervals {
        self.inner.intervals.read().clone()
    }

    /// Set the sink for uncaught action failures. The default sink logs
    /// and continues.
    pub fn set_exception_handler(
        &self,
        handler: impl Fn(&Task, &TaskError) + Send + Sync + 'static,
    ) {
        *self.inner.exception_handler.write() = Arc::new(handler);
    }

    /// Observe task state transitions (e.g. to drive a loading indicator).
    pub fn set_task_state_handler(
        &self,
        handler: impl Fn(&Task, TaskState) + Send + Sync + 'static,
    ) {
        *self.inner.state_handler.write() = Some(Arc::new(handler));
    }

    /// Replace the worker pool for subsequently registered tasks. Queueing
    /// beyond pool capacity is unbounded; size the pool for the expected
    /// concurrent load.
    pub fn set_executor(&self, pool: Arc<rayon::ThreadPool>) {
        *self.inner.executor.write() = pool;
    }

    /// Snapshot of the scheduler's operational counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics.lock().clone()
    }

    /// Number of live tasks currently registered for `ui`.
    pub fn task_count(&self, ui: &UiContext) -> usize {
        self.inner.registry.count_for(ui.id())
    }

    //--- Polling cadence

    /// Recompute the owner's poll interval as the minimum across its live
    /// tasks, entering the UI's exclusive context to do so. Invoked whenever
    /// a task joins or leaves the registry and whenever a missed-cycle
    /// counter changes. A detached owner is ignored.
    pub fn adjust_polling_interval(&self, ui: &Arc<UiContext>) {
        let _ = ui.run_exclusive(|ui_state| self.adjust_locked(ui, ui_state));
    }

    /// Lock-held recomputation. Idempotent: rewriting an unchanged interval
    /// is skipped.
    pub(crate) fn adjust_locked(&self, ui: &Arc<UiContext>, ui_state: &UiState) {
        let minimum = self.inner.registry.min_interval_for(ui.id());
        if ui_state.poll_interval() != minimum {
            debug!("UI {}: poll interval -> {:?}", ui.id(), minimum);
            ui_state.set_poll_interval(minimum);
        }
    }

    //--- Internal plumbing for tasks

    pub(crate) fn executor(&self) -> Arc<rayon::ThreadPool> {
        Arc::clone(&self.inner.executor.read())
    }

    pub(crate) fn interval_for(&self, missed: u32) -> Duration {
        self.inner.intervals.read().interval_for(missed)
    }

    pub(crate) fn add_task(&self, ui: &Arc<UiContext>, task: &Task) {
        self.inner.registry.add(ui.id(), task.clone());
    }

    pub(crate) fn remove_task(&self, ui: &Arc<UiContext>, task: &Task) {
        self.inner.registry.remove(ui.id(), task);
    }

    pub(crate) fn handle_exception(&self, task: &Task, error: &TaskError) {
        let handler = Arc::clone(&self.inner.exception_handler.read());
        handler(task, error);
    }

    pub(crate) fn notify_state(&self, task: &Task, state: TaskState) {
        let handler = self.inner.state_handler.read().clone();
        if let Some(handler) = handler {
            handler(task, state);
        }
    }

    pub(crate) fn record_started(&self) {
        self.inner.metrics.lock().record_started();
    }

    pub(crate) fn record_run(&self, duration: Duration, failed: bool) {
        self.inner.metrics.lock().record_run(duration, failed);
    }

    pub(crate) fn record_canceled(&self) {
        self.inner.metrics.lock().record_canceled();
    }
}

/// Default exception sink: log and continue.
fn log_exception(task: &Task, error: &TaskError) {
    warn!("Task {} failed: {}", task.id(), error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    use viewflow_ui::PushMode;

    fn test_scheduler() -> Scheduler {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Scheduler::with_pool_size(4)
    }

    #[test]
    fn delivery_mode_follows_the_push_channel() {
        let scheduler = test_scheduler();

        let pushed = scheduler.register(
            &Component::attached(&UiContext::new(PushMode::Automatic)),
            |_| Ok(()),
        );
        pushed.join().unwrap();
        assert_eq!(pushed.delivery_mode(), Some(crate::task::DeliveryMode::Push));

        let polled = scheduler.register(
            &Component::attached(&UiContext::new(PushMode::Disabled)),
            |_| Ok(()),
        );
        polled.join().unwrap();
        assert_eq!(polled.delivery_mode(), Some(crate::task::DeliveryMode::Polling));
    }

    #[test]
    fn forced_polling_overrides_an_available_push_channel() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Automatic);
        let component = Component::attached(&ui);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let task = scheduler.register_polling(&component, move |_| {
            release_rx.recv().ok();
            Ok(())
        });

        assert_eq!(task.delivery_mode(), Some(crate::task::DeliveryMode::Polling));
        assert_eq!(ui.poll_interval(), Some(Duration::from_millis(200)));

        release_tx.send(()).unwrap();
        task.join().unwrap();
        assert_eq!(ui.poll_interval(), None);
    }

    #[test]
    fn registration_is_deferred_until_attach() {
        let scheduler = test_scheduler();
        let component = Component::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        let task = scheduler.register(&component, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(task.delivery_mode(), None);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        component.attach(UiContext::new(PushMode::Automatic));
        task.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_attach_suppresses_execution() {
        let scheduler = test_scheduler();
        let component = Component::new();

        let task = scheduler.register(&component, |_| {
            panic!("action must not run after a pre-attach cancel");
        });
        task.cancel();

        component.attach(UiContext::new(PushMode::Automatic));
        assert_eq!(task.join(), Err(TaskError::Interrupted));
        assert_eq!(task.delivery_mode(), None);
    }

    #[test]
    fn cancel_racing_a_deferred_attach_leaves_no_trace() {
        let scheduler = test_scheduler();

        for _ in 0..200 {
            let ui = UiContext::new(PushMode::Automatic);
            let component = Component::new();
            let task = scheduler.register(&component, |_| Ok(()));

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let attacher = {
                let barrier = Arc::clone(&barrier);
                let component = Arc::clone(&component);
                let ui = Arc::clone(&ui);
                thread::spawn(move || {
                    barrier.wait();
                    component.attach(ui);
                })
            };
            let canceller = {
                let barrier = Arc::clone(&barrier);
                let task = task.clone();
                thread::spawn(move || {
                    barrier.wait();
                    task.cancel();
                })
            };
            attacher.join().unwrap();
            canceller.join().unwrap();
            let _ = task.join();

            // Whichever side won, a terminal task must not keep its owner
            // or its registry slot alive.
            assert!(task.ui().is_none());
            assert_eq!(scheduler.task_count(&ui), 0);
        }
    }

    #[test]
    fn register_sync_runs_on_the_calling_thread() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Automatic);
        let component = Component::attached(&ui);

        let caller = thread::current().id();
        let task = scheduler.register_sync(&component, |task| {
            assert_eq!(thread::current().id(), caller);
            task.push(|_| Ok(()));
            Ok(())
        });

        assert_eq!(task.delivery_mode(), Some(crate::task::DeliveryMode::Sync));
        // Degenerate lifecycle: no-ops, never terminal in the async sense.
        task.cancel();
        task.join().unwrap();
        assert!(task.ui().is_some());
        assert_eq!(scheduler.task_count(&ui), 0);
    }

    #[test]
    fn sync_task_failures_reach_the_sink() {
        let scheduler = test_scheduler();
        let component = Component::attached(&UiContext::new(PushMode::Automatic));

        let sinked = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&sinked);
        scheduler.set_exception_handler(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.register_sync(&component, |_| Err(TaskError::failed("sync boom")));
        assert_eq!(sinked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_sink_sees_the_failing_task_exactly_once() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Automatic);
        let component = Component::attached(&ui);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scheduler.set_exception_handler(move |task, error| {
            sink.lock().push((task.id(), error.clone()));
        });

        let task = scheduler.register(&component, |_| Err(TaskError::failed("boom")));
        assert_eq!(task.join(), Err(TaskError::failed("boom")));

        let calls = seen.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, task.id());
        assert_eq!(calls[0].1, TaskError::failed("boom"));
    }

    #[test]
    fn owner_interval_is_the_minimum_across_live_tasks() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Disabled);
        let component = Component::attached(&ui);

        let (release1_tx, release1_rx) = mpsc::channel::<()>();
        let task1 = scheduler.register(&component, move |_| {
            release1_rx.recv().ok();
            Ok(())
        });
        task1.set_polling_intervals(vec![Duration::from_millis(200)]);

        let (release2_tx, release2_rx) = mpsc::channel::<()>();
        let task2 = scheduler.register(&component, move |_| {
            release2_rx.recv().ok();
            Ok(())
        });
        task2.set_polling_intervals(vec![Duration::from_millis(1000)]);

        scheduler.adjust_polling_interval(&ui);
        assert_eq!(ui.poll_interval(), Some(Duration::from_millis(200)));

        release1_tx.send(()).unwrap();
        task1.join().unwrap();
        assert_eq!(ui.poll_interval(), Some(Duration::from_millis(1000)));

        release2_tx.send(()).unwrap();
        task2.join().unwrap();
        assert_eq!(ui.poll_interval(), None, "no live polling tasks left");
    }

    #[test]
    fn push_tasks_do_not_hold_polling_open() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Automatic);
        let component = Component::attached(&ui);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let task = scheduler.register(&component, move |_| {
            release_rx.recv().ok();
            Ok(())
        });

        scheduler.adjust_polling_interval(&ui);
        assert_eq!(ui.poll_interval(), None);

        release_tx.send(()).unwrap();
        task.join().unwrap();
    }

    #[test]
    fn empty_interval_table_resets_to_default() {
        let scheduler = test_scheduler();
        scheduler.set_polling_intervals(vec![Duration::from_secs(5)]);
        assert_eq!(
            scheduler.polling_intervals().as_slice(),
            &[Duration::from_secs(5)]
        );

        scheduler.set_polling_intervals(Vec::new());
        assert_eq!(scheduler.polling_intervals(), PollingIntervals::default());
    }

    #[test]
    fn replaced_executor_runs_subsequent_tasks() {
        let scheduler = test_scheduler();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .expect("Failed to build worker thread pool");
        scheduler.set_executor(Arc::new(pool));

        let component = Component::attached(&UiContext::new(PushMode::Automatic));
        let task = scheduler.register(&component, |_| Ok(()));
        task.join().unwrap();
    }

    #[test]
    fn metrics_track_the_task_lifecycle() {
        let scheduler = test_scheduler();
        let ui = UiContext::new(PushMode::Automatic);
        let component = Component::attached(&ui);

        scheduler
            .register(&component, |_| Ok(()))
            .join()
            .unwrap();
        let _ = scheduler.register(&component, |_| Err(TaskError::failed("x"))).join();

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let cancelled = scheduler.register(&component, move |_| {
            started_tx.send(()).ok();
            release_rx.recv().ok();
            Ok(())
        });
        started_rx.recv().unwrap();
        cancelled.cancel();
        release_tx.send(()).unwrap();
        let _ = cancelled.join();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let m = scheduler.metrics();
            if m.tasks_started == 3 && m.tasks_completed + m.tasks_failed == 3 {
                assert_eq!(m.tasks_failed, 1);
                assert_eq!(m.tasks_canceled, 1);
                assert!(m.last_completed.is_some());
                break;
            }
            assert!(Instant::now() < deadline, "metrics never settled");
            thread::sleep(Duration::from_millis(2));
        }

        // Snapshots serialize for dashboards.
        let snapshot = serde_json::to_value(scheduler.metrics()).unwrap();
        assert_eq!(snapshot["tasks_canceled"], 1);
    }

    #[test]
    fn clones_share_configuration_and_registry() {
        let scheduler = test_scheduler();
        let clone = scheduler.clone();
        clone.set_polling_intervals(vec![Duration::from_millis(50)]);
        assert_eq!(
            scheduler.polling_intervals().as_slice(),
            &[Duration::from_millis(50)]
        );
    }
}
