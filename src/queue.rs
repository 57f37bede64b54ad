use crate::config::QueueConfig;
use crate::engine::{Command, QueueEngine};
use crate::error::QueueError;
use crate::handle::TaskHandle;
use crate::notifier::{EventNotifier, QueueEvent, QueueEventKind, TaskFailure};
use crate::task::Task;
use crate::token::CancellationToken;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken as CloseToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_QUEUE_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the queue should behave when it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
  /// Runs every queued task, and the running one, to completion.
  Graceful,
  /// Cancels every queued task (each settles with `TaskCancelled` without
  /// being invoked) and flags the running task's token.
  Forceful,
}

/// Runs pushed tasks one at a time, in push order.
///
/// The queue state lives on an engine task spawned onto the given Tokio
/// runtime; this type is the cheap, cloneable front door to it. When every
/// clone is dropped the engine finishes whatever was queued and stops.
#[derive(Clone)]
pub struct SequentialTaskQueue {
  queue_name: Arc<String>,
  default_timeout: Option<Duration>,
  command_tx: mpsc::UnboundedSender<Command>,
  close_token: CloseToken,
  queued_count: Arc<AtomicUsize>,
  notifier: Arc<EventNotifier>,
}

impl fmt::Debug for SequentialTaskQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SequentialTaskQueue")
      .field("queue_name", &self.queue_name)
      .field("default_timeout", &self.default_timeout)
      .field("closed", &self.is_closed())
      .field("queued", &self.queued_task_count())
      .field("notifier", &self.notifier)
      .finish()
  }
}

impl SequentialTaskQueue {
  pub fn new(tokio_handle: TokioHandle, queue_name: &str) -> Self {
    Self::with_config(tokio_handle, QueueConfig::default().with_name(queue_name))
  }

  pub fn with_config(tokio_handle: TokioHandle, config: QueueConfig) -> Self {
    let queue_name = Arc::new(config.name);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (notifier, events) = EventNotifier::new(&tokio_handle, queue_name.clone());
    let queued_count = Arc::new(AtomicUsize::new(0));

    let engine = QueueEngine::new(
      queue_name.clone(),
      tokio_handle.clone(),
      command_rx,
      events,
      queued_count.clone(),
    );
    tokio_handle.spawn(
      engine
        .run()
        .instrument(info_span!("sequential_queue_engine", name = %*queue_name)),
    );

    Self {
      queue_name,
      default_timeout: config.default_timeout,
      command_tx,
      close_token: CloseToken::new(),
      queued_count,
      notifier,
    }
  }

  pub fn name(&self) -> &str {
    &self.queue_name
  }

  pub fn is_closed(&self) -> bool {
    self.close_token.is_cancelled()
  }

  /// Returns the number of tasks pushed but not yet started (or skipped).
  pub fn queued_task_count(&self) -> usize {
    self.queued_count.load(AtomicOrdering::SeqCst)
  }

  /// Appends `task` to the queue and returns a handle to its token and result.
  ///
  /// Never runs the task inline, even when the queue is idle.
  ///
  /// # Errors
  /// Returns `QueueError::QueueClosed` once `close` has been called.
  pub fn push<T: Send + 'static>(&self, task: Task<T>) -> Result<TaskHandle<T>, QueueError> {
    if self.close_token.is_cancelled() {
      warn!(queue_name = %self.queue_name, "Push: Attempted to push a task onto a closed queue.");
      return Err(QueueError::QueueClosed);
    }

    let task_id = NEXT_QUEUE_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let token = CancellationToken::new();
    let (record, result_rx) = task.into_record(task_id, token.clone(), self.default_timeout);

    debug!(queue_name = %self.queue_name, %task_id, timeout = ?record.timeout, "Pushing task onto queue.");

    self.queued_count.fetch_add(1, AtomicOrdering::SeqCst);
    if self.command_tx.send(Command::Push(record)).is_err() {
      self.queued_count.fetch_sub(1, AtomicOrdering::SeqCst);
      error!(queue_name = %self.queue_name, %task_id, "Push: Queue engine is gone, task dropped.");
      return Err(QueueError::QueueClosed);
    }

    Ok(TaskHandle {
      task_id,
      cancellation_token: token,
      result_receiver: Some(result_rx),
    })
  }

  /// Resolves once nothing is queued or running.
  ///
  /// The request is registered when `wait` is called, not when the future is
  /// first polled. Even on an idle queue it resolves on a later turn, after
  /// every event emitted so far has reached its handlers.
  pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    let _ = self.command_tx.send(Command::Wait(tx));
    let queue_name = self.queue_name.clone();
    async move {
      if rx.await.is_err() {
        trace!(queue_name = %queue_name, "Wait: Queue engine already stopped, nothing left to drain.");
      }
    }
  }

  /// Stops accepting tasks and resolves once the queue has drained.
  ///
  /// Calling it again is harmless; the later call resolves on the same drain.
  pub fn close(&self, mode: CloseMode) -> impl Future<Output = ()> + Send + 'static {
    if self.close_token.is_cancelled() {
      info!(queue_name = %self.queue_name, ?mode, "Close already in progress or completed.");
    } else {
      info!(queue_name = %self.queue_name, ?mode, "Closing queue.");
      self.close_token.cancel();
    }

    let (tx, rx) = oneshot::channel();
    let _ = self.command_tx.send(Command::Close { mode, done: tx });
    let queue_name = self.queue_name.clone();
    async move {
      let _ = rx.await;
      info!(queue_name = %queue_name, "Queue closed and drained.");
    }
  }

  /// Subscribes `handler` to every event of `kind`.
  pub fn on(&self, kind: QueueEventKind, handler: impl Fn(QueueEvent) + Send + Sync + 'static) {
    self.notifier.add_handler(kind, handler);
  }

  /// Subscribes to task failures: errors, panics, timeouts and cancellations.
  /// Handlers never affect queue progression.
  pub fn on_error(&self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) {
    self.notifier.add_handler(QueueEventKind::Error, move |event| {
      if let QueueEvent::Error(failure) = event {
        handler(failure);
      }
    });
  }

  pub fn on_timeout(&self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) {
    self.notifier.add_handler(QueueEventKind::Timeout, move |event| {
      if let QueueEvent::Timeout(failure) = event {
        handler(failure);
      }
    });
  }

  pub fn on_drained(&self, handler: impl Fn() + Send + Sync + 'static) {
    self.notifier.add_handler(QueueEventKind::Drained, move |_| handler());
  }
}
