use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use viewflow_ui::{Component, PushMode, Registration, UiContext, UiState};

use crate::error::TaskError;
use crate::intervals::PollingIntervals;
use crate::manager::{Scheduler, TaskState};
use crate::worker::WorkerHandle;

/// A deferred unit of work bound to a UI owner.
pub type AsyncAction = Box<dyn FnOnce(&Task) -> Result<(), TaskError> + Send>;

/// How results reach the client; fixed once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Results are pushed into the UI context from the worker thread.
    Push,
    /// Results become visible on the next client poll cycle.
    Polling,
    /// The action ran synchronously on the registering thread.
    Sync,
}

struct TaskInner {
    id: Uuid,
    scheduler: Scheduler,
    worker: Arc<WorkerHandle>,
    mode: OnceLock<DeliveryMode>,
    /// Poll cycles elapsed since the action started, polling mode only.
    missed_polls: AtomicU32,
    /// Whether `cancel()` may raise the cooperative interrupt flag.
    may_interrupt: AtomicBool,
    /// Terminal-transition guard; whoever flips it runs the finish
    /// sequence, everyone else backs off.
    finished: AtomicBool,
    /// Owner back-reference; cleared at termination. Doubles as the
    /// liveness flag for `push` and `ui()`.
    ui: RwLock<Option<Arc<UiContext>>>,
    /// Lifecycle subscriptions released exactly once by the finish sequence.
    registrations: Mutex<Vec<Registration>>,
    /// Per-task interval table; falls back to the scheduler's table.
    interval_override: RwLock<Option<PollingIntervals>>,
}

/// Handle to a registered task. Cheap to clone; all clones refer to the
/// same underlying task.
///
/// Created by [`Scheduler::register`] and friends. The handle stays valid
/// after the task terminates: `push` becomes a silent no-op and [`Task::ui`]
/// returns `None`, so callers need not guard against lifecycle races.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                scheduler,
                worker: WorkerHandle::new(),
                mode: OnceLock::new(),
                missed_polls: AtomicU32::new(0),
                may_interrupt: AtomicBool::new(true),
                finished: AtomicBool::new(false),
                ui: RwLock::new(None),
                registrations: Mutex::new(Vec::new()),
                interval_override: RwLock::new(None),
            }),
        }
    }

    /// Degenerate task for synchronous registration: not queued, not in any
    /// registry, `cancel`/`join` are no-ops.
    pub(crate) fn new_sync(scheduler: Scheduler, ui: Option<Arc<UiContext>>) -> Self {
        let task = Self::new(scheduler);
        let _ = task.inner.mode.set(DeliveryMode::Sync);
        *task.inner.ui.write() = ui;
        task
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Delivery mode; `None` until registration completes (a task registered
    /// against a not-yet-attached component stays undecided until attach).
    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        self.inner.mode.get().copied()
    }

    /// The owning UI context, or `None` once the task is terminal.
    pub fn ui(&self) -> Option<Arc<UiContext>> {
        self.inner.ui.read().clone()
    }

    /// Whether a cancellation with interruption has been requested. Long
    /// actions poll this to bail out early.
    pub fn is_interrupted(&self) -> bool {
        self.inner.worker.is_interrupted()
    }

    /// Allow `cancel()` to interrupt the worker. Default behaviour.
    pub fn allow_thread_interrupt(&self) {
        self.inner.may_interrupt.store(true, Ordering::SeqCst);
    }

    /// Prevent `cancel()` from interrupting the worker; used by actions to
    /// protect a non-reentrant critical section.
    pub fn prevent_thread_interrupt(&self) {
        self.inner.may_interrupt.store(false, Ordering::SeqCst);
    }

    /// Override the interval table for this task only. Takes effect at the
    /// next interval recomputation.
    pub fn set_polling_intervals(&self, intervals: impl Into<Vec<Duration>>) {
        *self.inner.interval_override.write() = Some(PollingIntervals::new(intervals));
    }

    /// Poll cycles elapsed since the action started (polling mode).
    pub fn missed_polls(&self) -> u32 {
        self.inner.missed_polls.load(Ordering::SeqCst)
    }

    /// This task's contribution to the owner's poll cadence: `None`
    /// ("infinite", contributes nothing) outside polling mode.
    pub fn polling_interval(&self) -> Option<Duration> {
        if self.delivery_mode() != Some(DeliveryMode::Polling) {
            return None;
        }
        let missed = self.missed_polls();
        if let Some(table) = &*self.inner.interval_override.read() {
            return Some(table.interval_for(missed));
        }
        Some(self.inner.scheduler.interval_for(missed))
    }

    /// Run `callback` under the owner's exclusive lock.
    ///
    /// Silent no-op once the task is terminal, and a detached owner is
    /// swallowed; any other callback failure goes to the exception sink.
    /// In manual push mode the channel is flushed after a successful
    /// callback; in polling mode the update simply rides the next poll
    /// cycle.
    pub fn push(&self, callback: impl FnOnce(&UiState) -> Result<(), TaskError>) {
        let Some(ui) = self.ui() else {
            return;
        };
        let must_flush = self.delivery_mode() == Some(DeliveryMode::Push)
            && ui.push_mode() == PushMode::Manual;
        let result = ui.run_exclusive(|ui_state| {
            let out = callback(ui_state);
            if out.is_ok() && must_flush {
                ui_state.flush_push();
            }
            out
        });
        match result {
            Err(_) => {
                // Owner went away between the liveness check and delivery.
                debug!("task {}: push dropped, UI detached", self.inner.id);
            }
            Ok(Err(TaskError::UiDetached(_))) => {}
            Ok(Err(e)) => self.inner.scheduler.handle_exception(self, &e),
            Ok(Ok(())) => {}
        }
    }

    /// Cancel and unregister the task. Idempotent; racing with natural
    /// completion resolves first-writer-wins, so at most one of
    /// `Done`/`Canceled` is ever observed.
    ///
    /// Whether the worker is interrupted is controlled by
    /// [`Task::allow_thread_interrupt`] / [`Task::prevent_thread_interrupt`].
    pub fn cancel(&self) {
        if self.delivery_mode() == Some(DeliveryMode::Sync) {
            return;
        }
        // The terminal transition decides the race with natural completion;
        // only the winner may touch the worker. A task already reported as
        // `Done` must keep a joinable, uncancelled worker.
        if self.finish(TaskState::Canceled) {
            self.inner
                .worker
                .cancel(self.inner.may_interrupt.load(Ordering::SeqCst));
        }
    }

    /// Block until the worker reaches a terminal state, re-raising the
    /// action's failure. The only path that surfaces action errors to the
    /// registrant.
    pub fn join(&self) -> Result<(), TaskError> {
        if self.delivery_mode() == Some(DeliveryMode::Sync) {
            return Ok(());
        }
        self.inner.worker.join()
    }

    //--- Registration

    /// Bind the action to an attached owner and submit it to the pool.
    /// Called once, either directly or from the deferred attach listener.
    pub(crate) fn register(
        &self,
        ui: Arc<UiContext>,
        component: &Arc<Component>,
        action: AsyncAction,
        force_polling: bool,
    ) {
        if self.inner.finished.load(Ordering::SeqCst) || self.inner.worker.is_terminal() {
            debug!("task {}: cancelled before attach, skipping", self.inner.id);
            return;
        }

        let mode = if ui.push_mode().is_enabled() && !force_polling {
            DeliveryMode::Push
        } else {
            DeliveryMode::Polling
        };
        let _ = self.inner.mode.set(mode);
        *self.inner.ui.write() = Some(Arc::clone(&ui));
        self.inner.scheduler.add_task(&ui, self);

        {
            let mut registrations = self.inner.registrations.lock();
            if mode == DeliveryMode::Polling {
                let task = self.clone();
                registrations.push(ui.on_poll(move |_| task.on_poll_event()));
            }
            let task = self.clone();
            registrations.push(ui.on_detach(move |_| task.cancel()));
            let task = self.clone();
            registrations.push(component.on_detach(move |_| task.cancel()));
            let task = self.clone();
            registrations.push(ui.on_before_leave(move |_| task.cancel()));
        }

        if mode == DeliveryMode::Polling {
            // The new task may lower the owner's minimum right away.
            self.inner.scheduler.adjust_polling_interval(&ui);
        }

        let task = self.clone();
        self.inner
            .scheduler
            .executor()
            .spawn(move || task.run_worker(action));

        // A cancel may land while the wiring above is still in flight; its
        // finish sequence then misses whatever was installed after the flag
        // flipped. Re-check and unwind so a terminal task never lingers in
        // the registry or keeps its owner alive. Every step here is
        // idempotent against the finish sequence proper.
        if self.inner.finished.load(Ordering::SeqCst) {
            self.inner.scheduler.remove_task(&ui, self);
            self.release_registrations();
            *self.inner.ui.write() = None;
            self.inner.scheduler.adjust_polling_interval(&ui);
        }
    }

    pub(crate) fn add_registration(&self, registration: Registration) {
        if self.inner.finished.load(Ordering::SeqCst) {
            registration.remove();
            return;
        }
        self.inner.registrations.lock().push(registration);
    }

    //--- Worker unit

    /// Pool-thread body wrapping the user action: classify errors, record
    /// metrics, run the finish sequence on every exit path.
    fn run_worker(&self, action: AsyncAction) {
        if !self.inner.worker.start() {
            // Cancelled before a pool thread picked it up; cancel() already
            // ran the finish sequence.
            return;
        }
        self.inner.scheduler.notify_state(self, TaskState::Running);
        self.inner.scheduler.record_started();

        let started = Instant::now();
        let result = action(self);
        match &result {
            Ok(()) => {}
            Err(TaskError::UiDetached(_)) => {
                debug!("task {}: UI detached during execution", self.inner.id);
            }
            Err(TaskError::Interrupted) => {
                debug!("task {}: interrupted", self.inner.id);
            }
            Err(e) => self.inner.scheduler.handle_exception(self, e),
        }
        let failed = matches!(&result, Err(TaskError::Failed(_)));
        self.inner.scheduler.record_run(started.elapsed(), failed);

        self.finish(TaskState::Done);
        self.inner.worker.complete(result);
    }

    //--- Finish sequence

    /// Terminal transition: registry removal, interval recomputation and
    /// listener release under the UI lock, owner reference cleared. Runs at
    /// most once; racing callers observe the flag and back off. Returns
    /// whether this call performed the transition.
    fn finish(&self, state: TaskState) -> bool {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("task {} finished: {:?}", self.inner.id, state);
        self.inner.scheduler.notify_state(self, state);
        if state == TaskState::Canceled {
            self.inner.scheduler.record_canceled();
        }

        let ui = self.inner.ui.read().clone();
        match ui {
            Some(ui) => {
                self.inner.scheduler.remove_task(&ui, self);
                let scheduler = self.inner.scheduler.clone();
                let released = ui.run_exclusive(|ui_state| {
                    scheduler.adjust_locked(&ui, ui_state);
                    self.release_registrations();
                });
                if released.is_err() {
                    // Detached UI receives no poll cycles anyway, but the
                    // subscriptions still have to go.
                    self.release_registrations();
                }
                *self.inner.ui.write() = None;
            }
            None => self.release_registrations(),
        }
        true
    }

    fn release_registrations(&self) {
        let registrations = std::mem::take(&mut *self.inner.registrations.lock());
        for registration in registrations {
            registration.remove();
        }
    }

    //--- Event listeners

    /// One elapsed notification cycle without a result: bump the counter
    /// and let the owner's cadence decay along the interval table.
    fn on_poll_event(&self) {
        if self.delivery_mode() != Some(DeliveryMode::Polling) {
            return;
        }
        self.inner.missed_polls.fetch_add(1, Ordering::SeqCst);
        if let Some(ui) = self.ui() {
            self.inner.scheduler.adjust_polling_interval(&ui);
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("mode", &self.delivery_mode())
            .finish()
    }
}
