use crate::error::QueueError;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// The erased view of a task's result slot, as the engine sees it.
pub(crate) trait Settle: Send + Sync {
  /// Rejects the slot unless it was already settled. Returns whether this call settled it.
  fn reject(&self, error: QueueError) -> bool;

  fn is_settled(&self) -> bool;
}

/// A result slot that can be settled exactly once.
///
/// The task runner and the engine both hold a clone: the runner resolves it
/// with whatever the callable produced, the engine rejects it on timeout or
/// pre-start cancellation. Whoever gets there first wins, later attempts are
/// discarded.
pub(crate) struct Deferred<T: Send + 'static> {
  slot: Arc<Mutex<Option<oneshot::Sender<Result<T, QueueError>>>>>,
}

impl<T: Send + 'static> Clone for Deferred<T> {
  fn clone(&self) -> Self {
    Self {
      slot: self.slot.clone(),
    }
  }
}

impl<T: Send + 'static> Deferred<T> {
  pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<T, QueueError>>) {
    let (tx, rx) = oneshot::channel();
    (
      Self {
        slot: Arc::new(Mutex::new(Some(tx))),
      },
      rx,
    )
  }

  /// Settles the slot with `outcome`. Returns `false` if it had already been settled.
  ///
  /// A dropped receiver still counts as settled; the outcome is simply lost.
  pub(crate) fn settle(&self, outcome: Result<T, QueueError>) -> bool {
    let sender = self.slot.lock().take();
    match sender {
      Some(tx) => {
        if tx.send(outcome).is_err() {
          tracing::trace!("Result receiver was dropped before settlement, outcome discarded.");
        }
        true
      }
      None => false,
    }
  }
}

impl<T: Send + 'static> Settle for Deferred<T> {
  fn reject(&self, error: QueueError) -> bool {
    self.settle(Err(error))
  }

  fn is_settled(&self) -> bool {
    self.slot.lock().is_none()
  }
}
