use sequential_queue::{BoxError, CancellationToken, CloseMode, QueueError, SequentialTaskQueue, Task, TaskHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn interruptible_task(id: usize, duration_s: u64, token: CancellationToken) -> Result<String, BoxError> {
  info!("Task {} starting (potentially long: {}s), watching its token.", id, duration_s);
  tokio::select! {
    _ = token.cancelled() => {
      info!("Task {} observed cancellation ({:?}).", id, token.reason());
      Err(format!("Task {} interrupted", id).into())
    }
    _ = tokio::time::sleep(Duration::from_secs(duration_s)) => Ok(format!("Task {} completed NORMALLY", id)),
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Forceful Close Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "forceful_close_queue");
  queue.on_error(|failure| info!("Error event for task {}: {}", failure.task_id, failure.error));

  let mut handles: Vec<TaskHandle<String>> = Vec::new();
  for i in 0..5 {
    match queue.push(Task::with_token(move |token| interruptible_task(i, 5, token))) {
      Ok(handle) => handles.push(handle),
      Err(e) => tracing::error!("Failed to push task {}: {:?}", i, e),
    }
  }

  tokio::time::sleep(Duration::from_millis(200)).await;
  info!("Initiating FORCEFUL close...");
  queue.close(CloseMode::Forceful).await;

  for mut handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Err(QueueError::TaskCancelled) => info!("Task {} was cancelled as expected.", task_id),
      other => info!("Task {} settled with {:?}", task_id, other),
    }
  }
  info!("--- Forceful Close Example End ---");
}
