use crate::error::QueueError;
use crate::token::CancellationToken;

use tokio::sync::oneshot;

/// A handle to a task pushed onto a `SequentialTaskQueue`.
///
/// Carries the task's cancellation token and the receiving end of its result.
/// Dropping the handle does not affect the task; it still runs in its turn.
#[derive(Debug)]
pub struct TaskHandle<T: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) cancellation_token: CancellationToken,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<T, QueueError>>>,
}

impl<T: Send + 'static> TaskHandle<T> {
  /// The id assigned at `push`, also carried by this task's failure events.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Returns a clone of the task's cancellation token, which can outlive the handle.
  pub fn token(&self) -> CancellationToken {
    self.cancellation_token.clone()
  }

  /// True once anyone holding the token, the queue included, has cancelled it.
  pub fn is_cancellation_requested(&self) -> bool {
    self.cancellation_token.is_cancelled()
  }

  /// Requests cancellation of this task.
  ///
  /// A task that has not started yet is skipped and settles with
  /// `QueueError::TaskCancelled`. A running task is only flagged and must
  /// observe its token to stop early.
  pub fn cancel(&self) {
    tracing::debug!(task_id = %self.task_id, "Cancelling queued task.");
    self.cancellation_token.cancel();
  }

  /// Awaits the settlement of the task and returns its result.
  ///
  /// # Errors
  /// Returns `QueueError::TaskFailed` if the callable returned an error.
  /// Returns `QueueError::TaskPanicked` if the callable panicked.
  /// Returns `QueueError::TaskTimedOut` if the task exceeded its timeout.
  /// Returns `QueueError::TaskCancelled` if the task was cancelled before it started, or gave up after observing its token.
  /// Returns `QueueError::ResultChannelError` if the queue engine went away without settling the task.
  /// Returns `QueueError::ResultUnavailable` if `await_result` has already been called.
  pub async fn await_result(&mut self) -> Result<T, QueueError> {
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(task_outcome) => task_outcome,
        Err(recv_error) => {
          tracing::warn!(task_id = %self.task_id, %recv_error, "Queue dropped the task without settling it.");
          Err(QueueError::ResultChannelError(format!(
            "task {} was dropped unsettled: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => Err(QueueError::ResultUnavailable),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn handle_with_channel() -> (TaskHandle<u8>, oneshot::Sender<Result<u8, QueueError>>) {
    let (tx, rx) = oneshot::channel();
    let handle = TaskHandle {
      task_id: 9,
      cancellation_token: CancellationToken::new(),
      result_receiver: Some(rx),
    };
    (handle, tx)
  }

  #[tokio::test]
  async fn result_can_only_be_taken_once() {
    let (mut handle, tx) = handle_with_channel();
    tx.send(Ok(3)).unwrap();

    assert_eq!(handle.await_result().await.unwrap(), 3);
    assert!(matches!(handle.await_result().await, Err(QueueError::ResultUnavailable)));
  }

  #[tokio::test]
  async fn dropped_sender_is_a_channel_error() {
    let (mut handle, tx) = handle_with_channel();
    drop(tx);
    assert!(matches!(handle.await_result().await, Err(QueueError::ResultChannelError(_))));
  }

  #[test]
  fn cancel_flips_the_shared_token() {
    let (handle, _tx) = handle_with_channel();
    let token = handle.token();
    handle.cancel();
    assert!(handle.is_cancellation_requested());
    assert!(token.is_cancelled());
  }
}
