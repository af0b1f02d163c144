//! Consumer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a batch (array) payload is handled. Pick one per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStrategy {
    /// Run every item through the handler in order, then settle the frame
    /// once: ack if no item failed, otherwise nack.
    #[default]
    Inline,
    /// Send every item back to the same queue as its own message, then ack
    /// the frame. Items are handled when they are redelivered.
    Reenqueue,
}

/// Options for a [`Consumer`](super::Consumer).
///
/// Deserializable, so services can load them from their own configuration:
///
/// ```
/// use fanout_adapter::{BatchStrategy, ConsumerOptions};
///
/// let options: ConsumerOptions = serde_json::from_str(
///     r#"{ "exchange": "orders.created", "queue": "invoices", "successMessage": "Invoice created" }"#,
/// ).unwrap();
///
/// assert!(!options.requeue_on_error);
/// assert_eq!(options.batch_strategy, BatchStrategy::Inline);
/// assert_eq!(options.error_publish_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    /// Fanout exchange the queue is bound to.
    pub exchange: String,
    /// Logical queue name; namespaced with the service identity.
    pub queue: String,
    /// Logged at info level after each successful record.
    pub success_message: String,
    /// Redelivery flag for nacks after a handler failure.
    #[serde(default)]
    pub requeue_on_error: bool,
    #[serde(default)]
    pub batch_strategy: BatchStrategy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts at publishing an error record before falling back to the log.
    #[serde(default = "default_error_publish_attempts")]
    pub error_publish_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_error_publish_attempts() -> u32 {
    3
}

impl ConsumerOptions {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        success_message: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            success_message: success_message.into(),
            requeue_on_error: false,
            batch_strategy: BatchStrategy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            error_publish_attempts: default_error_publish_attempts(),
        }
    }

    pub fn requeue_on_error(mut self, requeue: bool) -> Self {
        self.requeue_on_error = requeue;
        self
    }

    pub fn batch_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.batch_strategy = strategy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn error_publish_attempts(mut self, attempts: u32) -> Self {
        self.error_publish_attempts = attempts;
        self
    }
}
