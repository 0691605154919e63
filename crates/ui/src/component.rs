use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::context::UiContext;
use crate::event::{AttachEvent, DetachEvent, ListenerSet, Registration};

/// A view-like owner of deferred work: it may or may not currently be
/// attached to a live [`UiContext`].
///
/// Holding a `Component` never keeps a detached context alive; the UI
/// back-reference is cleared on detach.
pub struct Component {
    id: Uuid,
    ui: RwLock<Option<Arc<UiContext>>>,
    attach_listeners: ListenerSet<AttachEvent>,
    detach_listeners: ListenerSet<DetachEvent>,
}

impl Component {
    /// Create a detached component.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            ui: RwLock::new(None),
            attach_listeners: ListenerSet::new(),
            detach_listeners: ListenerSet::new(),
        })
    }

    /// Create a component already attached to `ui`.
    pub fn attached(ui: &Arc<UiContext>) -> Arc<Self> {
        let component = Self::new();
        component.attach(Arc::clone(ui));
        component
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The owning UI context, if attached.
    pub fn ui(&self) -> Option<Arc<UiContext>> {
        self.ui.read().clone()
    }

    pub fn on_attach(&self, f: impl Fn(&AttachEvent) + Send + Sync + 'static) -> Registration {
        self.attach_listeners.subscribe(f)
    }

    /// One-shot attach listener; unsubscribes itself after the first event.
    pub fn on_attach_once(&self, f: impl FnOnce(&AttachEvent) + Send + 'static) -> Registration {
        self.attach_listeners.subscribe_once(f)
    }

    pub fn on_detach(&self, f: impl Fn(&DetachEvent) + Send + Sync + 'static) -> Registration {
        self.detach_listeners.subscribe(f)
    }

    /// Attach to a UI context and notify attach listeners.
    pub fn attach(&self, ui: Arc<UiContext>) {
        *self.ui.write() = Some(Arc::clone(&ui));
        self.attach_listeners.fire(&AttachEvent { ui });
    }

    /// Detach from the current UI context, notifying detach listeners
    /// before the back-reference is cleared.
    pub fn detach(&self) {
        if self.ui.read().is_none() {
            return;
        }
        self.detach_listeners.fire(&DetachEvent);
        *self.ui.write() = None;
    }
}
