use crate::error::QueueError;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, trace, Instrument};

// --- Public Event Types for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEventKind {
  /// A task failed, panicked, timed out or was cancelled.
  Error,
  /// A task did not settle within its timeout. Always followed by an `Error` event.
  Timeout,
  /// The queue went from busy to having nothing queued or running.
  Drained,
}

/// The `{ error, task identity }` payload of error and timeout events.
#[derive(Debug, Clone)]
pub struct TaskFailure {
  pub task_id: u64,
  pub queue_name: Arc<String>,
  pub error: QueueError,
  pub failed_at: SystemTime,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
  Error(TaskFailure),
  Timeout(TaskFailure),
  Drained { queue_name: Arc<String> },
}

impl QueueEvent {
  pub fn kind(&self) -> QueueEventKind {
    match self {
      QueueEvent::Error(_) => QueueEventKind::Error,
      QueueEvent::Timeout(_) => QueueEventKind::Timeout,
      QueueEvent::Drained { .. } => QueueEventKind::Drained,
    }
  }
}

type EventHandler = Arc<dyn Fn(QueueEvent) + Send + Sync + 'static>;

// --- Internal Message (crate-public) ---
pub(crate) enum NotifierMessage {
  Event(QueueEvent),
  /// Released once every event sent before it has been dispatched.
  Barrier(Vec<oneshot::Sender<()>>),
}

/// Fans queue events out to registered handlers.
///
/// Events are dispatched on a dedicated Tokio task, one at a time and in the
/// order the engine emitted them, so a slow or panicking handler never holds
/// up the run loop.
pub(crate) struct EventNotifier {
  handlers: Arc<RwLock<Vec<(QueueEventKind, EventHandler)>>>,
  queue_name: Arc<String>,
}

impl fmt::Debug for EventNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("EventNotifier")
      .field("queue_name", &self.queue_name)
      .field("handler_count", &handler_count)
      .finish()
  }
}

/// The engine's end of the notifier channel.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
  tx: mpsc::UnboundedSender<NotifierMessage>,
  queue_name: Arc<String>,
}

impl EventSender {
  pub(crate) fn emit_failure(&self, task_id: u64, error: QueueError) {
    let failure = TaskFailure {
      task_id,
      queue_name: self.queue_name.clone(),
      error,
      failed_at: SystemTime::now(),
    };
    if failure.error.is_timeout() {
      self.send(QueueEvent::Timeout(failure.clone()));
    }
    self.send(QueueEvent::Error(failure));
  }

  pub(crate) fn emit_drained(&self) {
    self.send(QueueEvent::Drained {
      queue_name: self.queue_name.clone(),
    });
  }

  /// Resolves `waiters` after all previously emitted events have reached their handlers.
  pub(crate) fn release_after_dispatch(&self, waiters: Vec<oneshot::Sender<()>>) {
    if waiters.is_empty() {
      return;
    }
    if let Err(mpsc::error::SendError(message)) = self.tx.send(NotifierMessage::Barrier(waiters)) {
      trace!(queue_name = %*self.queue_name, "Notifier worker gone, releasing waiters directly.");
      if let NotifierMessage::Barrier(waiters) = message {
        for waiter in waiters {
          let _ = waiter.send(());
        }
      }
    }
  }

  fn send(&self, event: QueueEvent) {
    if self.tx.send(NotifierMessage::Event(event)).is_err() {
      trace!(queue_name = %*self.queue_name, "Notifier worker gone, event dropped.");
    }
  }
}

impl EventNotifier {
  pub(crate) fn new(tokio_handle: &TokioHandle, queue_name: Arc<String>) -> (Arc<Self>, EventSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = Arc::new(Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      queue_name: queue_name.clone(),
    });

    tokio_handle.spawn(
      Self::run_notification_worker_loop(rx, notifier.handlers.clone())
        .instrument(info_span!("notification_worker_loop", queue_name = %*queue_name)),
    );

    (notifier, EventSender { tx, queue_name })
  }

  pub(crate) fn add_handler(&self, kind: QueueEventKind, handler: impl Fn(QueueEvent) + Send + Sync + 'static) {
    let mut handlers_guard = self.handlers.write();
    handlers_guard.push((kind, Arc::new(handler)));
    info!(queue_name = %*self.queue_name, ?kind, "Notifier: Added new event handler. Total handlers: {}", handlers_guard.len());
  }

  async fn run_notification_worker_loop(
    mut queue_rx: mpsc::UnboundedReceiver<NotifierMessage>,
    handlers_list_arc: Arc<RwLock<Vec<(QueueEventKind, EventHandler)>>>,
  ) {
    info!("Notification worker started. Will process messages until the queue engine stops.");

    while let Some(message) = queue_rx.recv().await {
      match message {
        NotifierMessage::Event(event) => Self::dispatch(&handlers_list_arc, event),
        NotifierMessage::Barrier(waiters) => {
          trace!("Notification worker: releasing {} waiter(s).", waiters.len());
          for waiter in waiters {
            let _ = waiter.send(());
          }
        }
      }
    }

    info!("Notification worker stopped (input channel closed and processed).");
  }

  fn dispatch(handlers_list_arc: &RwLock<Vec<(QueueEventKind, EventHandler)>>, event: QueueEvent) {
    let kind = event.kind();
    // Snapshot the matching handlers so one of them may register more without deadlocking.
    let matching: Vec<EventHandler> = handlers_list_arc
      .read()
      .iter()
      .filter(|(handler_kind, _)| *handler_kind == kind)
      .map(|(_, handler)| handler.clone())
      .collect();

    if matching.is_empty() {
      trace!(?kind, "No handlers registered for event, dropping notification.");
      return;
    }

    debug!(?kind, "Dispatching event to {} handler(s).", matching.len());
    for handler in matching {
      let event_for_handler = event.clone();
      let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event_for_handler)));
      if result.is_err() {
        error!(?kind, "An event handler panicked during execution.");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn barrier_waits_for_earlier_events() {
    let (notifier, sender) = EventNotifier::new(&TokioHandle::current(), Arc::new("notifier_unit".to_string()));
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    notifier.add_handler(QueueEventKind::Error, move |_| {
      seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    sender.emit_failure(1, QueueError::TaskCancelled);
    sender.emit_failure(2, QueueError::TaskCancelled);
    let (tx, rx) = oneshot::channel();
    sender.release_after_dispatch(vec![tx]);

    rx.await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn timeout_emits_timeout_then_error() {
    let (notifier, sender) = EventNotifier::new(&TokioHandle::current(), Arc::new("notifier_unit".to_string()));
    let kinds = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for kind in [QueueEventKind::Timeout, QueueEventKind::Error] {
      let kinds = kinds.clone();
      notifier.add_handler(kind, move |event| kinds.lock().push(event.kind()));
    }

    sender.emit_failure(7, QueueError::TaskTimedOut(std::time::Duration::from_millis(3)));
    let (tx, rx) = oneshot::channel();
    sender.release_after_dispatch(vec![tx]);
    rx.await.unwrap();

    assert_eq!(*kinds.lock(), vec![QueueEventKind::Timeout, QueueEventKind::Error]);
  }

  #[tokio::test]
  async fn panicking_handler_does_not_stop_dispatch() {
    let (notifier, sender) = EventNotifier::new(&TokioHandle::current(), Arc::new("notifier_unit".to_string()));
    let seen = Arc::new(AtomicUsize::new(0));
    notifier.add_handler(QueueEventKind::Drained, |_| panic!("handler blew up"));
    let seen_clone = seen.clone();
    notifier.add_handler(QueueEventKind::Drained, move |_| {
      seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    sender.emit_drained();
    sender.emit_drained();
    let (tx, rx) = oneshot::channel();
    sender.release_after_dispatch(vec![tx]);
    rx.await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn waiters_are_released_when_worker_is_gone() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let sender = EventSender {
      tx,
      queue_name: Arc::new("orphan".to_string()),
    };
    let (waiter_tx, mut waiter_rx) = oneshot::channel();
    sender.release_after_dispatch(vec![waiter_tx]);
    assert!(waiter_rx.try_recv().is_ok());
  }
}
