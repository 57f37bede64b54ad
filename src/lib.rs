//! A Tokio-based queue that runs futures strictly one at a time, in the
//! order they were pushed, with per-task timeouts, cooperative cancellation,
//! drain waiting and error notification.

mod config;
mod deferred;
mod engine;
mod error;
mod handle;
mod notifier;
mod queue;
mod task;
mod token;

pub use config::{QueueConfig, DEFAULT_QUEUE_NAME};
pub use error::{BoxError, QueueError};
pub use handle::TaskHandle;
pub use notifier::{QueueEvent, QueueEventKind, TaskFailure};
pub use queue::{CloseMode, SequentialTaskQueue};
pub use task::{Task, TaskFuture};
pub use token::{CancelReason, CancellationToken};
