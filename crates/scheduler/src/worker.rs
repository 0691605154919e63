use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

/// Execution state of a worker unit.
enum WorkerState {
    /// Created but not yet picked up by a pool thread.
    Pending,
    /// Running on a pool thread.
    Running,
    /// Action finished with the recorded outcome.
    Done(Result<(), TaskError>),
}

struct WorkerInner {
    state: WorkerState,
    cancelled: bool,
}

/// Cancellable, awaitable handle shared between a pool thread and the task.
///
/// Mirrors the lifecycle of a one-shot future: `Pending → Running → Done`,
/// with cancellation possible from either side of that arrow. A handle
/// cancelled while still `Pending` is never started by the pool thread.
pub struct WorkerHandle {
    inner: Mutex<WorkerInner>,
    done: Condvar,
    /// Cooperative interrupt flag; raised by `cancel(true)` and observable
    /// by the running action.
    interrupted: AtomicBool,
}

impl WorkerHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Pending,
                cancelled: false,
            }),
            done: Condvar::new(),
            interrupted: AtomicBool::new(false),
        })
    }

    /// Transition `Pending → Running`. Returns `false` if the handle was
    /// cancelled first, in which case the action must not be executed.
    pub(crate) fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return false;
        }
        inner.state = WorkerState::Running;
        true
    }

    /// Record the action outcome and wake all joiners.
    pub(crate) fn complete(&self, outcome: Result<(), TaskError>) {
        let mut inner = self.inner.lock();
        inner.state = WorkerState::Done(outcome);
        self.done.notify_all();
    }

    /// Cancel the worker. Returns `true` if this call actually cancelled it,
    /// `false` if it had already finished or been cancelled.
    ///
    /// With `interrupt` set, the cooperative interrupt flag is raised so a
    /// running action can observe the cancellation and bail out.
    pub fn cancel(&self, interrupt: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled || matches!(inner.state, WorkerState::Done(_)) {
            return false;
        }
        inner.cancelled = true;
        if interrupt {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        if matches!(inner.state, WorkerState::Pending) {
            // Never ran, never will: settle the outcome for joiners.
            inner.state = WorkerState::Done(Err(TaskError::Interrupted));
        }
        self.done.notify_all();
        true
    }

    /// Block until the worker reaches a terminal state, re-raising the
    /// action's failure. A cancelled worker yields [`TaskError::Interrupted`].
    pub fn join(&self) -> Result<(), TaskError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.cancelled {
                return Err(TaskError::Interrupted);
            }
            if let WorkerState::Done(outcome) = &inner.state {
                return outcome.clone();
            }
            self.done.wait(&mut inner);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Whether the worker can no longer be cancelled (done or cancelled).
    pub fn is_terminal(&self) -> bool {
        let inner = self.inner.lock();
        inner.cancelled || matches!(inner.state, WorkerState::Done(_))
    }

    /// Whether a cancel with interruption was requested.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
