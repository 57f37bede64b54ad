use sequential_queue::{BoxError, CancellationToken, CloseMode, SequentialTaskQueue, Task};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

// Stands in for a backend whose latency we do not control.
async fn echo(query: &'static str, latency_ms: u64) -> String {
  tokio::time::sleep(Duration::from_millis(latency_ms)).await;
  query.to_string()
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Timeouts Example ---");

  let queue = SequentialTaskQueue::new(Handle::current(), "timeout_queue");
  let responses = Arc::new(parking_lot::Mutex::new(Vec::new()));
  queue.on_timeout(|failure| info!("Task {} timed out: {}", failure.task_id, failure.error));

  for (query, latency_ms) in [("foo", 20), ("bar", 2000), ("baz", 10)] {
    let responses = responses.clone();
    let task = Task::with_token(move |token: CancellationToken| async move {
      let response = echo(query, latency_ms).await;
      // A timed-out task keeps running; it must not publish a stale response.
      if !token.is_cancelled() {
        responses.lock().push(format!("Server responded: {}", response));
      }
      Ok::<_, BoxError>(())
    })
    .timeout(Duration::from_millis(1000));
    queue.push(task).expect("Failed to push echo task");
  }

  queue.wait().await;
  info!("Collected responses: {:?}", responses.lock());

  queue.close(CloseMode::Graceful).await;
  info!("--- Timeouts Example End ---");
}
