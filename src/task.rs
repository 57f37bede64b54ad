use crate::deferred::{Deferred, Settle};
use crate::error::{BoxError, QueueError};
use crate::token::CancellationToken;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use tokio::sync::oneshot;
use tracing::debug;

/// The future a task callable produces once invoked.
pub type TaskFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// The erased body of a queued record. Invoking it runs the callable, settles
/// the record's result slot and reports the outcome back to the engine.
pub(crate) type TaskRunner = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), QueueError>> + Send>;

enum Callable<T> {
  Plain(Box<dyn FnOnce() -> TaskFuture<T> + Send>),
  WithToken(Box<dyn FnOnce(CancellationToken) -> TaskFuture<T> + Send>),
}

impl<T: Send + 'static> Callable<T> {
  fn invoke(self, token: CancellationToken) -> TaskFuture<T> {
    match self {
      Callable::Plain(callable) => callable(),
      Callable::WithToken(callable) => callable(token),
    }
  }
}

/// A unit of work waiting to be pushed onto a `SequentialTaskQueue`.
///
/// ```ignore
/// queue.push(Task::new(|| async { Ok::<_, BoxError>(1) }))?;
/// queue.push(Task::with_token(|token| async move { ... }).timeout(Duration::from_secs(1)))?;
/// ```
pub struct Task<T: Send + 'static> {
  callable: Callable<T>,
  timeout: Option<Duration>,
}

impl<T: Send + 'static> Task<T> {
  /// A zero-argument asynchronous callable.
  pub fn new<F, Fut, E>(callable: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      callable: Callable::Plain(Box::new(move || -> TaskFuture<T> { callable().map_err(Into::into).boxed() })),
      timeout: None,
    }
  }

  /// A callable that receives the task's cancellation token and is expected
  /// to poll it at its own suspension points.
  pub fn with_token<F, Fut, E>(callable: F) -> Self
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      callable: Callable::WithToken(Box::new(move |token: CancellationToken| -> TaskFuture<T> {
        callable(token).map_err(Into::into).boxed()
      })),
      timeout: None,
    }
  }

  /// A callable invoked with `args` when its turn comes. Lets one handler
  /// function be queued many times without wrapping it in a fresh closure.
  pub fn with_args<A, F, Fut, E>(callable: F, args: A) -> Self
  where
    A: Send + 'static,
    F: FnOnce(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      callable: Callable::Plain(Box::new(move || -> TaskFuture<T> { callable(args).map_err(Into::into).boxed() })),
      timeout: None,
    }
  }

  /// A synchronous callable. It still runs on the queue's turn, never inline
  /// at `push`.
  pub fn from_fn<F, E>(callable: F) -> Self
  where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      callable: Callable::Plain(Box::new(move || -> TaskFuture<T> {
        async move {
          let result: Result<T, BoxError> = callable().map_err(Into::into);
          result
        }
        .boxed()
      })),
      timeout: None,
    }
  }

  /// Rejects the task with `QueueError::TaskTimedOut` if it has not settled
  /// `timeout` after it started. Overrides the queue's default timeout.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub(crate) fn into_record(
    self,
    task_id: u64,
    token: CancellationToken,
    default_timeout: Option<Duration>,
  ) -> (TaskRecord, oneshot::Receiver<Result<T, QueueError>>) {
    let (deferred, result_rx) = Deferred::<T>::channel();
    let runner_deferred = deferred.clone();
    let callable = self.callable;

    let runner: TaskRunner = Box::new(move |token: CancellationToken| -> BoxFuture<'static, Result<(), QueueError>> {
      async move {
        let invoke_token = token.clone();
        let caught = AssertUnwindSafe(async move { callable.invoke(invoke_token).await })
          .catch_unwind()
          .await;

        let outcome = match caught {
          Ok(Ok(value)) => Ok(value),
          // The task gave up after its token was cancelled.
          Ok(Err(error)) if token.is_cancelled() => {
            debug!(%task_id, reason = ?token.reason(), %error, "Task returned an error after cancellation, settling as cancelled.");
            Err(QueueError::TaskCancelled)
          }
          Ok(Err(error)) => Err(QueueError::task_failed(error)),
          Err(panic_payload) => Err(QueueError::TaskPanicked(panic_message(panic_payload.as_ref()))),
        };

        let status = match &outcome {
          Ok(_) => Ok(()),
          Err(error) => Err(error.clone()),
        };
        if !runner_deferred.settle(outcome) {
          debug!(%task_id, "Task settled after its record was already settled, outcome discarded.");
        }
        status
      }
      .boxed()
    });

    let record = TaskRecord {
      task_id,
      timeout: self.timeout.or(default_timeout),
      token,
      deferred: Arc::new(deferred),
      runner,
    };
    (record, result_rx)
  }
}

impl<T: Send + 'static> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let shape = match self.callable {
      Callable::Plain(_) => "plain",
      Callable::WithToken(_) => "with_token",
    };
    f.debug_struct("Task")
      .field("shape", &shape)
      .field("timeout", &self.timeout)
      .finish()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Internal representation of a task owned by the queue engine, from `push`
/// until settlement.
pub(crate) struct TaskRecord {
  pub(crate) task_id: u64,
  pub(crate) timeout: Option<Duration>,
  pub(crate) token: CancellationToken,
  pub(crate) deferred: Arc<dyn Settle>,
  pub(crate) runner: TaskRunner,
}

impl fmt::Debug for TaskRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRecord")
      .field("task_id", &self.task_id)
      .field("timeout", &self.timeout)
      .field("token", &self.token)
      .field("settled", &self.deferred.is_settled())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn runner_settles_the_result_slot() {
    let task = Task::with_args(|n: u32| async move { Ok::<_, BoxError>(n * 2) }, 21);
    let token = CancellationToken::new();
    let (record, rx) = task.into_record(1, token.clone(), None);

    assert!((record.runner)(token).await.is_ok());
    assert_eq!(rx.await.unwrap().unwrap(), 42);
  }

  #[tokio::test]
  async fn error_after_cancellation_is_reported_as_cancelled() {
    let task = Task::with_token(|token: CancellationToken| async move {
      token.cancel();
      Err::<(), _>("gave up")
    });
    let token = CancellationToken::new();
    let (record, rx) = task.into_record(2, token.clone(), None);

    let status = (record.runner)(token).await;
    assert!(matches!(status, Err(QueueError::TaskCancelled)));
    assert!(matches!(rx.await.unwrap(), Err(QueueError::TaskCancelled)));
  }

  #[tokio::test]
  async fn panics_become_task_panicked() {
    let task: Task<()> = Task::from_fn(|| -> Result<(), BoxError> { panic!("boom") });
    let token = CancellationToken::new();
    let (record, rx) = task.into_record(3, token.clone(), None);

    let status = (record.runner)(token).await;
    match status {
      Err(QueueError::TaskPanicked(message)) => assert_eq!(message, "boom"),
      other => panic!("Expected TaskPanicked, got {:?}", other),
    }
    assert!(matches!(rx.await.unwrap(), Err(QueueError::TaskPanicked(_))));
  }

  #[test]
  fn own_timeout_overrides_default() {
    let explicit = Task::new(|| async { Ok::<_, BoxError>(()) }).timeout(Duration::from_millis(5));
    let (record, _rx) = explicit.into_record(4, CancellationToken::new(), Some(Duration::from_secs(1)));
    assert_eq!(record.timeout, Some(Duration::from_millis(5)));

    let inherited = Task::new(|| async { Ok::<_, BoxError>(()) });
    let (record, _rx) = inherited.into_record(5, CancellationToken::new(), Some(Duration::from_secs(1)));
    assert_eq!(record.timeout, Some(Duration::from_secs(1)));
  }
}
