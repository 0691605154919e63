//! Minimal model of a host UI framework: a single-threaded, lock-protected
//! UI context with lifecycle events, plus attachable components.
//!
//! The scheduler crate consumes UI frameworks only through this surface:
//! an exclusive-lock entry point ([`UiContext::run_exclusive`]), a poll
//! interval knob, and subscribable lifecycle events that return
//! [`Registration`] handles.

pub mod component;
pub mod context;
pub mod error;
pub mod event;

pub use component::Component;
pub use context::{PushMode, UiContext, UiState};
pub use error::UiDetachedError;
pub use event::{AttachEvent, BeforeLeaveEvent, DetachEvent, ListenerSet, PollEvent, Registration};
