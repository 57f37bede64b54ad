use crate::deferred::Settle;
use crate::error::QueueError;
use crate::notifier::EventSender;
use crate::queue::CloseMode;
use crate::task::TaskRecord;
use crate::token::{CancelReason, CancellationToken};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Requests from the queue's front door to its engine.
pub(crate) enum Command {
  Push(TaskRecord),
  Wait(oneshot::Sender<()>),
  Close { mode: CloseMode, done: oneshot::Sender<()> },
}

/// The record currently holding the queue.
struct RunningTask {
  task_id: u64,
  token: CancellationToken,
  execution: BoxFuture<'static, Result<(), QueueError>>,
}

enum Step {
  Settled(Result<(), QueueError>),
  Command(Option<Command>),
}

/// The single owner of the queue's state.
///
/// Every mutation of `pending`, `current`, `closed` and `waiters` happens on
/// this task. The front door only ever sends it `Command`s, so no lock guards
/// the queue itself.
pub(crate) struct QueueEngine {
  queue_name: Arc<String>,
  tokio_handle: TokioHandle,
  commands: mpsc::UnboundedReceiver<Command>,
  events: EventSender,
  queued_count: Arc<AtomicUsize>,
  pending: VecDeque<TaskRecord>,
  current: Option<RunningTask>,
  waiters: Vec<oneshot::Sender<()>>,
  closed: bool,
  disconnected: bool,
  // Set once a record is dequeued, cleared when the drained event fires.
  busy: bool,
}

impl QueueEngine {
  pub(crate) fn new(
    queue_name: Arc<String>,
    tokio_handle: TokioHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
    queued_count: Arc<AtomicUsize>,
  ) -> Self {
    Self {
      queue_name,
      tokio_handle,
      commands,
      events,
      queued_count,
      pending: VecDeque::new(),
      current: None,
      waiters: Vec::new(),
      closed: false,
      disconnected: false,
      busy: false,
    }
  }

  pub(crate) async fn run(mut self) {
    info!(queue_name = %*self.queue_name, "Queue engine started.");

    loop {
      self.advance();
      if self.is_finished() {
        break;
      }

      let accept_commands = !self.disconnected;
      let step = tokio::select! {
        biased;

        outcome = Self::poll_current(&mut self.current) => Step::Settled(outcome),
        command = self.commands.recv(), if accept_commands => Step::Command(command),
      };

      match step {
        Step::Settled(outcome) => self.finish_current(outcome),
        Step::Command(Some(command)) => self.handle_command(command),
        Step::Command(None) => {
          info!(queue_name = %*self.queue_name, "All queue handles dropped. Finishing queued work before stopping.");
          self.disconnected = true;
          self.closed = true;
        }
      }
    }

    self.reject_late_commands();
    info!(queue_name = %*self.queue_name, "Queue engine stopped.");
  }

  fn is_finished(&self) -> bool {
    self.closed && self.current.is_none() && self.pending.is_empty()
  }

  /// Starts the next runnable record if the queue is idle, skipping records
  /// cancelled before their turn. Releases waiters once nothing is left.
  fn advance(&mut self) {
    while self.current.is_none() {
      let Some(record) = self.pending.pop_front() else {
        self.on_drained();
        return;
      };
      self.queued_count.fetch_sub(1, AtomicOrdering::SeqCst);
      self.busy = true;

      if record.token.is_cancelled() {
        debug!(
          queue_name = %*self.queue_name,
          task_id = record.task_id,
          reason = ?record.token.reason(),
          "Dequeued task already cancelled, skipping without invoking it."
        );
        if record.deferred.reject(QueueError::TaskCancelled) {
          self.events.emit_failure(record.task_id, QueueError::TaskCancelled);
        }
        continue;
      }

      self.current = Some(self.start(record));
    }
  }

  fn start(&self, record: TaskRecord) -> RunningTask {
    let TaskRecord {
      task_id,
      timeout,
      token,
      deferred,
      runner,
    } = record;
    debug!(queue_name = %*self.queue_name, %task_id, ?timeout, "Starting task.");

    // Spawned rather than polled inline: a task outliving its timeout keeps
    // running detached while the queue moves on.
    let mut join = self.tokio_handle.spawn(
      runner(token.clone()).instrument(info_span!("queued_task", queue_name = %*self.queue_name, %task_id)),
    );

    let timeout_token = token.clone();
    let execution = async move {
      let Some(limit) = timeout else {
        return flatten_join(join.await, deferred.as_ref());
      };
      match tokio::time::timeout(limit, &mut join).await {
        Ok(joined) => flatten_join(joined, deferred.as_ref()),
        Err(_elapsed) => {
          if deferred.reject(QueueError::TaskTimedOut(limit)) {
            timeout_token.cancel_with(CancelReason::TimedOut);
            Err(QueueError::TaskTimedOut(limit))
          } else {
            // Settled right at the deadline.
            flatten_join(join.await, deferred.as_ref())
          }
        }
      }
    }
    .boxed();

    RunningTask {
      task_id,
      token,
      execution,
    }
  }

  async fn poll_current(current: &mut Option<RunningTask>) -> Result<(), QueueError> {
    match current {
      Some(running) => (&mut running.execution).await,
      None => std::future::pending().await,
    }
  }

  fn finish_current(&mut self, outcome: Result<(), QueueError>) {
    let Some(finished) = self.current.take() else {
      return;
    };

    match outcome {
      Ok(()) => {
        debug!(queue_name = %*self.queue_name, task_id = finished.task_id, "Task settled successfully.");
      }
      Err(task_error) => {
        match &task_error {
          QueueError::TaskPanicked(_) => {
            error!(queue_name = %*self.queue_name, task_id = finished.task_id, %task_error, "Task panicked during execution.")
          }
          QueueError::TaskTimedOut(_) => {
            warn!(queue_name = %*self.queue_name, task_id = finished.task_id, %task_error, "Task timed out, its callable is left running detached.")
          }
          _ => warn!(queue_name = %*self.queue_name, task_id = finished.task_id, %task_error, "Task settled with an error."),
        }
        self.events.emit_failure(finished.task_id, task_error);
      }
    }
  }

  fn handle_command(&mut self, command: Command) {
    match command {
      Command::Push(record) => {
        if self.closed {
          debug!(queue_name = %*self.queue_name, task_id = record.task_id, "Push raced with close, rejecting task.");
          self.queued_count.fetch_sub(1, AtomicOrdering::SeqCst);
          record.deferred.reject(QueueError::QueueClosed);
          return;
        }
        trace!(queue_name = %*self.queue_name, task_id = record.task_id, "Task appended to pending.");
        self.pending.push_back(record);
      }
      Command::Wait(waiter) => self.waiters.push(waiter),
      Command::Close { mode, done } => {
        self.closed = true;
        if mode == CloseMode::Forceful {
          info!(
            queue_name = %*self.queue_name,
            pending = self.pending.len(),
            "Forceful close: cancelling pending tasks and flagging the running one."
          );
          for record in &self.pending {
            record.token.cancel_with(CancelReason::QueueClosed);
          }
          if let Some(running) = &self.current {
            running.token.cancel_with(CancelReason::QueueClosed);
          }
        }
        self.waiters.push(done);
      }
    }
  }

  fn on_drained(&mut self) {
    if self.busy {
      self.busy = false;
      debug!(queue_name = %*self.queue_name, "Queue drained.");
      self.events.emit_drained();
    }
    let waiters = std::mem::take(&mut self.waiters);
    self.events.release_after_dispatch(waiters);
  }

  fn reject_late_commands(&mut self) {
    self.commands.close();
    while let Ok(command) = self.commands.try_recv() {
      match command {
        Command::Push(record) => {
          self.queued_count.fetch_sub(1, AtomicOrdering::SeqCst);
          record.deferred.reject(QueueError::QueueClosed);
        }
        Command::Wait(waiter) | Command::Close { done: waiter, .. } => {
          let _ = waiter.send(());
        }
      }
    }
  }
}

fn flatten_join(
  joined: Result<Result<(), QueueError>, JoinError>,
  deferred: &dyn Settle,
) -> Result<(), QueueError> {
  match joined {
    Ok(status) => status,
    Err(join_error) => {
      let aborted = QueueError::TaskAborted(join_error.to_string());
      deferred.reject(aborted.clone());
      Err(aborted)
    }
  }
}
