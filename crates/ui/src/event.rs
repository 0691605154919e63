use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::context::UiContext;

/// Fired when a component becomes attached to a live UI context.
#[derive(Clone)]
pub struct AttachEvent {
    /// The UI context the component attached to.
    pub ui: Arc<UiContext>,
}

/// Fired when a UI context or component is detached.
#[derive(Clone, Copy)]
pub struct DetachEvent;

/// Fired on every client-driven notification (poll) cycle.
#[derive(Clone, Copy)]
pub struct PollEvent;

/// Fired before the UI navigates away from the current view.
#[derive(Clone, Copy)]
pub struct BeforeLeaveEvent;

/// Unsubscribe handle returned by every subscribe call.
///
/// The subscription is released exactly once: either by an explicit
/// [`Registration::remove`] or when the handle is dropped. Releasing after
/// the listener set is gone is a no-op.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the subscription.
    pub fn remove(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Slots<E> {
    next_key: u64,
    listeners: HashMap<u64, Listener<E>>,
}

/// A keyed set of event listeners.
///
/// Firing snapshots the current listeners before invoking them, so a
/// listener may subscribe or unsubscribe (including itself) re-entrantly.
pub struct ListenerSet<E> {
    slots: Arc<Mutex<Slots<E>>>,
}

impl<E: 'static> Default for ListenerSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> ListenerSet<E> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_key: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    fn insert(&self, listener: Listener<E>) -> Registration {
        let key = {
            let mut slots = self.slots.lock();
            let key = slots.next_key;
            slots.next_key += 1;
            slots.listeners.insert(key, listener);
            key
        };
        let weak = Arc::downgrade(&self.slots);
        Registration::new(move || Self::release(&weak, key))
    }

    fn release(slots: &Weak<Mutex<Slots<E>>>, key: u64) {
        if let Some(slots) = slots.upgrade() {
            slots.lock().listeners.remove(&key);
        }
    }

    /// Subscribe a listener. It stays active until the returned
    /// [`Registration`] is released.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Registration {
        self.insert(Arc::new(listener))
    }

    /// Subscribe a listener that fires at most once and then removes itself.
    pub fn subscribe_once(&self, listener: impl FnOnce(&E) + Send + 'static) -> Registration {
        let key = {
            let mut slots = self.slots.lock();
            let key = slots.next_key;
            slots.next_key += 1;
            key
        };
        let weak = Arc::downgrade(&self.slots);
        let pending = Mutex::new(Some(listener));
        let wrapped: Listener<E> = Arc::new(move |event| {
            if let Some(listener) = pending.lock().take() {
                listener(event);
            }
            Self::release(&weak, key);
        });
        self.slots.lock().listeners.insert(key, wrapped);
        let weak = Arc::downgrade(&self.slots);
        Registration::new(move || Self::release(&weak, key))
    }

    /// Fire the event to all current listeners.
    pub fn fire(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self.slots.lock().listeners.values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
