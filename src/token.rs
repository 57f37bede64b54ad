use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken as InnerToken;

/// Why a task's token was cancelled. Only the first cancellation is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
  /// A caller invoked `cancel()` on the token or its `TaskHandle`.
  Requested,
  /// The task did not settle within its timeout.
  TimedOut,
  /// The queue was closed with `CloseMode::Forceful`.
  QueueClosed,
}

/// Cooperative cancellation signal handed to every queued task.
///
/// Cancelling only flips the flag. A running task is expected to check
/// `is_cancelled()` (or await `cancelled()`) at its own suspension points and
/// give up by returning an error. A task that has not started yet is skipped
/// by the queue without being invoked.
#[derive(Clone)]
pub struct CancellationToken {
  inner: InnerToken,
  reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self {
      inner: InnerToken::new(),
      reason: Arc::new(Mutex::new(None)),
    }
  }

  /// Requests cancellation. Idempotent, and a no-op once the task has settled.
  pub fn cancel(&self) {
    self.cancel_with(CancelReason::Requested);
  }

  pub(crate) fn cancel_with(&self, reason: CancelReason) {
    {
      let mut guard = self.reason.lock();
      if guard.is_none() {
        *guard = Some(reason);
      }
    }
    self.inner.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.is_cancelled()
  }

  pub fn reason(&self) -> Option<CancelReason> {
    *self.reason.lock()
  }

  /// Resolves once the token is cancelled.
  pub async fn cancelled(&self) {
    self.inner.cancelled().await
  }
}

impl Default for CancellationToken {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CancellationToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancellationToken")
      .field("is_cancelled", &self.is_cancelled())
      .field("reason", &self.reason())
      .finish()
  }
}
