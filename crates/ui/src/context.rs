use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::UiDetachedError;
use crate::event::{BeforeLeaveEvent, DetachEvent, ListenerSet, PollEvent, Registration};

/// How results can be delivered from a worker thread to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// No push channel; updates become visible on the next poll cycle.
    Disabled,
    /// Push channel that flushes automatically after each exclusive access.
    Automatic,
    /// Push channel that requires an explicit flush after delivery.
    Manual,
}

impl PushMode {
    /// Whether a push channel is available at all.
    pub fn is_enabled(self) -> bool {
        !matches!(self, PushMode::Disabled)
    }
}

/// UI-observable state, only reachable through [`UiContext::run_exclusive`].
///
/// Fields are `Cell`s so nested exclusive accesses on the same thread (the
/// lock is reentrant) cannot conflict over a borrow.
pub struct UiState {
    poll_interval: Cell<Option<Duration>>,
    flushes: Cell<u64>,
}

impl UiState {
    /// Current poll interval, `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval.get()
    }

    /// Set or disable the poll interval.
    pub fn set_poll_interval(&self, interval: Option<Duration>) {
        self.poll_interval.set(interval);
    }

    /// Record an explicit push flush (manual push mode).
    pub fn flush_push(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }

    /// Number of explicit push flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.get()
    }
}

/// A single-threaded UI execution domain with an exclusive, reentrant lock.
///
/// All mutations of UI-observable state go through [`run_exclusive`]; the
/// lifecycle events (`poll`, `detach`, `before-leave`) are fired by the host
/// (or by tests simulating it) without the lock held, so listeners are free
/// to enter the lock themselves.
///
/// [`run_exclusive`]: UiContext::run_exclusive
pub struct UiContext {
    id: Uuid,
    push_mode: PushMode,
    /// Set once the detach event has fully dispatched; `run_exclusive`
    /// refuses entry afterwards.
    detached: AtomicBool,
    /// Guards against dispatching the detach event twice.
    detach_fired: AtomicBool,
    state: ReentrantMutex<UiState>,
    poll_listeners: ListenerSet<PollEvent>,
    detach_listeners: ListenerSet<DetachEvent>,
    before_leave_listeners: ListenerSet<BeforeLeaveEvent>,
}

impl UiContext {
    pub fn new(push_mode: PushMode) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            push_mode,
            detached: AtomicBool::new(false),
            detach_fired: AtomicBool::new(false),
            state: ReentrantMutex::new(UiState {
                poll_interval: Cell::new(None),
                flushes: Cell::new(0),
            }),
            poll_listeners: ListenerSet::new(),
            detach_listeners: ListenerSet::new(),
            before_leave_listeners: ListenerSet::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn push_mode(&self) -> PushMode {
        self.push_mode
    }

    /// Run `f` under the UI's exclusive lock.
    ///
    /// Blocks the calling thread until the lock is free and releases it on
    /// all exit paths. Reentrant: `f` may call `run_exclusive` again on the
    /// same thread. Fails with [`UiDetachedError`] once the context has been
    /// detached.
    pub fn run_exclusive<R>(&self, f: impl FnOnce(&UiState) -> R) -> Result<R, UiDetachedError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(UiDetachedError);
        }
        let state = self.state.lock();
        if self.detached.load(Ordering::SeqCst) {
            return Err(UiDetachedError);
        }
        Ok(f(&state))
    }

    /// Whether the detach event has completed.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Current poll interval (convenience for observers outside the lock).
    pub fn poll_interval(&self) -> Option<Duration> {
        self.state.lock().poll_interval()
    }

    /// Number of explicit push flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flush_count()
    }

    //--- Subscriptions

    pub fn on_poll(&self, f: impl Fn(&PollEvent) + Send + Sync + 'static) -> Registration {
        self.poll_listeners.subscribe(f)
    }

    pub fn on_detach(&self, f: impl Fn(&DetachEvent) + Send + Sync + 'static) -> Registration {
        self.detach_listeners.subscribe(f)
    }

    pub fn on_before_leave(
        &self,
        f: impl Fn(&BeforeLeaveEvent) + Send + Sync + 'static,
    ) -> Registration {
        self.before_leave_listeners.subscribe(f)
    }

    //--- Host-driven lifecycle

    /// Dispatch one notification (poll) cycle. No-op once detached.
    pub fn fire_poll(&self) {
        if self.is_detached() {
            return;
        }
        self.poll_listeners.fire(&PollEvent);
    }

    /// Detach the context: detach listeners run first (the context is still
    /// usable from inside them, as in a real framework teardown), then the
    /// context becomes permanently unavailable.
    pub fn detach(&self) {
        if self.detach_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("UI context {} detaching", self.id);
        self.detach_listeners.fire(&DetachEvent);
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Announce navigation away from the current view. The context stays
    /// live; listeners decide what to tear down.
    pub fn navigate_away(&self) {
        if self.is_detached() {
            return;
        }
        self.before_leave_listeners.fire(&BeforeLeaveEvent);
    }
}
