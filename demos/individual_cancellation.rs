use sequential_queue::{BoxError, CancellationToken, CloseMode, QueueError, SequentialTaskQueue, Task};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

// Checks its token after every awaited step and bails out once it is flipped.
async fn cooperative_task(id: &'static str, steps: u32, token: CancellationToken) -> Result<String, BoxError> {
  for step in 0..steps {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if token.is_cancelled() {
      warn!("Task ({}) noticed cancellation at step {}.", id, step);
      return Err(format!("Task ({}) stopped early", id).into());
    }
  }
  Ok(format!("Task ({}) finished normally.", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Individual Cancellation Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "cancellation_queue");

  let mut running = queue
    .push(Task::with_token(|token| cooperative_task("running", 20, token)))
    .expect("Failed to push running task");
  let mut waiting = queue
    .push(Task::with_token(|token| cooperative_task("waiting", 2, token)))
    .expect("Failed to push waiting task");
  let mut survivor = queue
    .push(Task::with_token(|token| cooperative_task("survivor", 2, token)))
    .expect("Failed to push surviving task");

  // Cancelled before its turn: it is skipped and never invoked.
  waiting.cancel();

  tokio::time::sleep(Duration::from_millis(250)).await;
  info!("Requesting cancellation for running task {}.", running.id());
  running.cancel();

  for (label, handle) in [("running", &mut running), ("waiting", &mut waiting), ("survivor", &mut survivor)] {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Task {} ({}) result: {}", task_id, label, result),
      Err(QueueError::TaskCancelled) => info!("Task {} ({}) correctly resulted in TaskCancelled.", task_id, label),
      Err(e) => warn!("Task {} ({}) resulted in unexpected error: {:?}", task_id, label, e),
    }
  }

  queue.close(CloseMode::Graceful).await;
  info!("--- Individual Cancellation Example End ---");
}
