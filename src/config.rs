use std::time::Duration;

pub const DEFAULT_QUEUE_NAME: &str = "sequential_queue";

/// Construction-time settings for a `SequentialTaskQueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
  /// Name attached to log records and event payloads.
  pub name: String,
  /// Timeout applied to tasks that do not set their own.
  pub default_timeout: Option<Duration>,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      name: DEFAULT_QUEUE_NAME.to_string(),
      default_timeout: None,
    }
  }
}

impl QueueConfig {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
    self.default_timeout = Some(timeout);
    self
  }
}
