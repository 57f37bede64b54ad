use sequential_queue::{
  BoxError, CloseMode, QueueConfig, QueueEvent, QueueEventKind, SequentialTaskQueue, Task, TaskFailure,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Error Notifier Example ---");

  let config = QueueConfig::default()
    .with_name("notifier_queue")
    .with_default_timeout(Duration::from_millis(500));
  let queue = SequentialTaskQueue::with_config(Handle::current(), config);

  // One central observer instead of inspecting every handle.
  let failures: Arc<parking_lot::Mutex<Vec<TaskFailure>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let failures_clone = failures.clone();
  queue.on_error(move |failure| {
    warn!("Task {} on {} failed: {}", failure.task_id, failure.queue_name, failure.error);
    failures_clone.lock().push(failure);
  });
  queue.on(QueueEventKind::Drained, |event| {
    if let QueueEvent::Drained { queue_name } = event {
      info!("Queue {} drained.", queue_name);
    }
  });

  queue
    .push(Task::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Err::<(), _>("Epic fail")
    }))
    .expect("push failed");
  queue
    .push(Task::new(|| async {
      // Exceeds the queue's default timeout.
      tokio::time::sleep(Duration::from_secs(2)).await;
      Ok::<_, BoxError>(())
    }))
    .expect("push failed");
  queue
    .push(Task::from_fn(|| Ok::<_, BoxError>(())))
    .expect("push failed");

  queue.wait().await;
  info!("Observed {} failure(s).", failures.lock().len());

  queue.close(CloseMode::Graceful).await;
  info!("--- Error Notifier Example End ---");
}
