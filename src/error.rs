use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// The error type a task callable may return. Anything convertible into it
/// (including `String` and `&str`) is accepted by the `Task` constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur within the `sequential_queue` queue.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
  #[error("Queue is closed, cannot accept new tasks")]
  QueueClosed,

  #[error("Task failed: {0}")]
  TaskFailed(Arc<dyn std::error::Error + Send + Sync + 'static>),

  #[error("Submitted task panicked: {0}")]
  TaskPanicked(String),

  #[error("Task did not settle within {0:?}")]
  TaskTimedOut(Duration),

  #[error("Task was cancelled")]
  TaskCancelled,

  #[error("Task was aborted by the runtime before settling: {0}")]
  TaskAborted(String),

  #[error("Task result channel error (queue engine stopped or receiver dropped): {0}")]
  ResultChannelError(String),

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,
}

impl QueueError {
  pub(crate) fn task_failed(error: BoxError) -> Self {
    QueueError::TaskFailed(Arc::from(error))
  }

  /// `true` for cancellation outcomes, whether the task was skipped before it
  /// started or observed its token and bailed out.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, QueueError::TaskCancelled)
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, QueueError::TaskTimedOut(_))
  }
}
