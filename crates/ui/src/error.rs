use thiserror::Error;

/// Returned when the UI context has been detached and can no longer be
/// entered. Expected during teardown races; callers usually swallow it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("UI context is detached")]
pub struct UiDetachedError;
