use sequential_queue::{BoxError, CloseMode, SequentialTaskQueue, Task, TaskHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<String, BoxError> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "basic_queue");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  // Longer tasks first: they still finish before the shorter ones queued after them.
  for i in 0..5 {
    let sleep_duration: u64 = 500 - (i as u64 * 100);
    match queue.push(Task::new(move || my_task_fn(i, sleep_duration))) {
      Ok(handle) => {
        info!("Pushed task {} with handle id {}", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to push task {}: {:?}", i, e),
    }
  }

  // Synchronous work goes through the same line.
  let sync_task = Task::from_fn(|| {
    info!("Synchronous task running after all of the above.");
    Ok::<_, BoxError>(String::from("sync done"))
  });
  if let Ok(handle) = queue.push(sync_task) {
    handles.push(handle);
  }

  info!("All tasks pushed. Waiting for the queue to drain...");
  queue.wait().await;

  for mut handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  queue.close(CloseMode::Graceful).await;
  info!("--- Basic Usage Example End ---");
}
