use sequential_queue::{BoxError, CloseMode, SequentialTaskQueue, Task, TaskHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn work_task_fn(id: usize, duration_ms: u64) -> Result<String, BoxError> {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  tokio::time::sleep(Duration::from_millis(duration_ms)).await;
  let result = format!("Task {} finished after {}ms", id, duration_ms);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Close Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "graceful_close_queue");
  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for i in 0..5 {
    match queue.push(Task::new(move || work_task_fn(i, 300))) {
      Ok(handle) => handles.push(handle),
      Err(e) => tracing::error!("Failed to push task {}: {:?}", i, e),
    }
  }
  info!("All 5 tasks pushed. Queued: {}", queue.queued_task_count());

  let closing = queue.close(CloseMode::Graceful);

  info!("Attempting to push a task after close...");
  match queue.push(Task::new(|| work_task_fn(99, 10))) {
    Ok(_) => tracing::error!("LATE PUSH SUCCEEDED (UNEXPECTED!)"),
    Err(e) => info!("Late push correctly failed: {}", e),
  }

  closing.await;
  info!("Queue closed. Every task queued before the close still ran:");
  for mut handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Task {} result: {}", task_id, result),
      Err(e) => info!("Task {} error: {:?}", task_id, e),
    }
  }
  info!("--- Graceful Close Example End ---");
}
