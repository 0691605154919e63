use thiserror::Error;

use viewflow_ui::UiDetachedError;

/// Error type for deferred actions and push callbacks.
///
/// Only [`TaskError::Failed`] reaches the exception sink: a detached owner
/// and an interrupt are both expected outcomes of the task lifecycle and are
/// swallowed by the worker unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The owning UI context went away while the action was in flight.
    #[error(transparent)]
    UiDetached(#[from] UiDetachedError),

    /// The task was cancelled and its worker asked to stop.
    #[error("task interrupted")]
    Interrupted,

    /// Action failure raised by user code.
    #[error("task failed: {0}")]
    Failed(String),
}

impl TaskError {
    /// Shorthand for building a [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_detached_converts() {
        fn inner() -> Result<(), TaskError> {
            let gone: Result<(), UiDetachedError> = Err(UiDetachedError);
            gone?;
            Ok(())
        }
        assert_eq!(inner(), Err(TaskError::UiDetached(UiDetachedError)));
    }

    #[test]
    fn display_messages() {
        assert_eq!(TaskError::Interrupted.to_string(), "task interrupted");
        assert_eq!(TaskError::failed("boom").to_string(), "task failed: boom");
    }
}
