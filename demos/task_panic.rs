use sequential_queue::{BoxError, CloseMode, QueueError, SequentialTaskQueue, Task};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn panicking_task() -> Result<String, BoxError> {
  info!("Panicking Task: Starting...");
  tokio::time::sleep(Duration::from_millis(100)).await;
  info!("Panicking Task: About to panic!");
  panic!("This task is designed to panic!");
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "panic_queue");

  let mut handle = queue.push(Task::new(panicking_task)).expect("Failed to push panicking task");
  let mut follower = queue
    .push(Task::from_fn(|| Ok::<_, BoxError>("the queue kept going".to_string())))
    .expect("Failed to push follow-up task");

  let task_id = handle.id();
  info!("Panicking task {} pushed. Awaiting result...", task_id);

  match handle.await_result().await {
    Ok(result) => info!("Task {} completed with UNEXPECTED result: {}", task_id, result),
    Err(QueueError::TaskPanicked(message)) => {
      info!("Task {} correctly resulted in TaskPanicked: {}", task_id, message);
    }
    Err(e) => info!("Task {} resulted in unexpected error: {:?}", task_id, e),
  }
  info!("Follow-up task: {:?}", follower.await_result().await);

  queue.close(CloseMode::Graceful).await;
  info!("--- Task Panic Example End ---");
}
