use sequential_queue::{
  BoxError, CancellationToken, CloseMode, QueueError, QueueEvent, QueueEventKind, SequentialTaskQueue, Task,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle as TokioHandle;
use tokio::time::sleep;

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sequential_queue=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Helper for collecting every event of the given kinds, in arrival order.
fn create_collecting_handlers(
  queue: &SequentialTaskQueue,
  kinds: &[QueueEventKind],
) -> Arc<parking_lot::Mutex<Vec<QueueEvent>>> {
  let collected = Arc::new(parking_lot::Mutex::new(Vec::new()));
  for kind in kinds {
    let collected_clone = collected.clone();
    queue.on(*kind, move |event: QueueEvent| {
      tracing::debug!("Test Collecting Handler: received {:?} event", event.kind());
      collected_clone.lock().push(event);
    });
  }
  collected
}

fn sleeping_task(duration_ms: u64) -> Task<()> {
  Task::new(move || async move {
    sleep(Duration::from_millis(duration_ms)).await;
    Ok::<_, BoxError>(())
  })
}

#[tokio::test]
async fn test_drained_fires_once_per_busy_period() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_drained");
  let drained = Arc::new(AtomicUsize::new(0));
  let drained_clone = drained.clone();
  queue.on_drained(move || {
    drained_clone.fetch_add(1, Ordering::SeqCst);
  });

  // An idle queue never drains.
  queue.wait().await;
  assert_eq!(drained.load(Ordering::SeqCst), 0);

  for _ in 0..3 {
    queue.push(sleeping_task(10)).unwrap();
  }
  queue.wait().await;
  assert_eq!(drained.load(Ordering::SeqCst), 1);

  queue.push(sleeping_task(10)).unwrap();
  queue.wait().await;
  queue.wait().await;
  assert_eq!(drained.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timeout_event_precedes_error_event() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_timeout");
  let events = create_collecting_handlers(
    &queue,
    &[QueueEventKind::Timeout, QueueEventKind::Error, QueueEventKind::Drained],
  );
  let timeouts = Arc::new(AtomicUsize::new(0));
  let timeouts_clone = timeouts.clone();
  queue.on_timeout(move |failure| {
    assert!(failure.error.is_timeout());
    timeouts_clone.fetch_add(1, Ordering::SeqCst);
  });

  let handle = queue.push(sleeping_task(300).timeout(Duration::from_millis(30))).unwrap();
  queue.wait().await;

  let kinds: Vec<QueueEventKind> = events.lock().iter().map(|event| event.kind()).collect();
  assert_eq!(
    kinds,
    vec![QueueEventKind::Timeout, QueueEventKind::Error, QueueEventKind::Drained]
  );
  assert_eq!(timeouts.load(Ordering::SeqCst), 1);
  let events = events.lock();
  match &events[0] {
    QueueEvent::Timeout(failure) => {
      assert_eq!(failure.task_id, handle.id());
      assert!(matches!(failure.error, QueueError::TaskTimedOut(d) if d == Duration::from_millis(30)));
    }
    other => panic!("Expected a timeout event, got {:?}", other),
  }
}

#[tokio::test]
async fn test_panicking_handler_does_not_stall_queue() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_handler_panic");
  let seen = Arc::new(AtomicUsize::new(0));
  queue.on_error(|_| panic!("handler exploded"));
  let seen_clone = seen.clone();
  queue.on_error(move |_| {
    seen_clone.fetch_add(1, Ordering::SeqCst);
  });

  let mut failing = queue.push(Task::from_fn(|| Err::<(), _>("epic fail"))).unwrap();
  let mut next = queue.push(Task::from_fn(|| Ok::<_, BoxError>(5))).unwrap();
  queue.wait().await;

  assert!(matches!(failing.await_result().await, Err(QueueError::TaskFailed(_))));
  assert_eq!(next.await_result().await.unwrap(), 5);
  assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_events_without_handlers_are_dropped() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_no_handlers");

  let mut failing = queue.push(Task::from_fn(|| Err::<(), _>("nobody listens"))).unwrap();
  queue.wait().await;
  assert!(matches!(failing.await_result().await, Err(QueueError::TaskFailed(_))));

  // Handlers registered later only see later events.
  let events = create_collecting_handlers(&queue, &[QueueEventKind::Error]);
  queue.push(Task::from_fn(|| Err::<(), _>("now someone does"))).unwrap();
  queue.wait().await;
  assert_eq!(events.lock().len(), 1);
}

#[tokio::test]
async fn test_forceful_close_reports_each_skipped_task() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_forceful_close");
  let events = create_collecting_handlers(&queue, &[QueueEventKind::Error, QueueEventKind::Drained]);

  // The running task ignores its token and still completes successfully.
  let mut running = queue.push(sleeping_task(80)).unwrap();
  let skipped: Vec<_> = (0..3).map(|_| queue.push(sleeping_task(10)).unwrap()).collect();

  sleep(Duration::from_millis(20)).await;
  queue.close(CloseMode::Forceful).await;

  assert!(running.await_result().await.is_ok());
  let events = events.lock();
  let error_ids: Vec<u64> = events
    .iter()
    .filter_map(|event| match event {
      QueueEvent::Error(failure) if failure.error.is_cancelled() => Some(failure.task_id),
      _ => None,
    })
    .collect();
  assert_eq!(error_ids, skipped.iter().map(|h| h.id()).collect::<Vec<_>>());
  assert!(matches!(events.last(), Some(QueueEvent::Drained { .. })));
}

#[tokio::test]
async fn test_cooperative_task_sees_cancel_from_timeout() {
  setup_tracing_for_test();
  let queue = SequentialTaskQueue::new(TokioHandle::current(), "test_notifier_timeout_token");
  let observed = Arc::new(AtomicUsize::new(0));
  let observed_clone = observed.clone();

  queue
    .push(
      Task::with_token(move |token: CancellationToken| async move {
        token.cancelled().await;
        observed_clone.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("gave up after timeout")
      })
      .timeout(Duration::from_millis(20)),
    )
    .unwrap();
  queue.wait().await;

  // The detached callable observes the flag shortly after the timeout fires.
  sleep(Duration::from_millis(50)).await;
  assert_eq!(observed.load(Ordering::SeqCst), 1);
}
