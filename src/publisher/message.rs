//! Publish requests and the publisher trait.

use std::error::Error;
use std::fmt;

use crate::broker::BrokerError;
use crate::record::Record;

/// Per-call publishing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishConfig {
    /// Stamp `messageOrigin` with the publisher's service identity.
    pub auto_set_origin: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            auto_set_origin: true,
        }
    }
}

/// Where a message goes once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Fan out on an exchange.
    Exchange(String),
    /// Point-to-point to a queue.
    Queue(String),
}

/// A request to publish one record.
///
/// If both `exchange` and `queue` are set, the exchange wins.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    pub exchange: Option<String>,
    pub queue: Option<String>,
    pub message: Record,
    pub config: PublishConfig,
}

impl SendMessage {
    pub fn to_exchange(exchange: impl Into<String>, message: Record) -> Self {
        Self {
            exchange: Some(exchange.into()),
            queue: None,
            message,
            config: PublishConfig::default(),
        }
    }

    pub fn to_queue(queue: impl Into<String>, message: Record) -> Self {
        Self {
            exchange: None,
            queue: Some(queue.into()),
            message,
            config: PublishConfig::default(),
        }
    }

    /// Leave `messageOrigin` as the caller set it.
    pub fn without_origin(mut self) -> Self {
        self.config.auto_set_origin = false;
        self
    }

    /// Resolve the destination.
    pub fn target(&self) -> Result<Target, PublishError> {
        match (&self.exchange, &self.queue) {
            (Some(exchange), _) => Ok(Target::Exchange(exchange.clone())),
            (None, Some(queue)) => Ok(Target::Queue(queue.clone())),
            (None, None) => Err(PublishError::MissingTarget),
        }
    }
}

/// Error type for publish operations.
#[derive(Debug)]
pub enum PublishError {
    /// Neither an exchange nor a queue was given.
    MissingTarget,
    /// The record could not be encoded as JSON.
    Serialization(serde_json::Error),
    /// The broker failed (connect, assert, publish or close).
    Broker(BrokerError),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::MissingTarget => {
                write!(f, "publish requires an exchange or a queue")
            }
            PublishError::Serialization(e) => write!(f, "failed to encode message: {}", e),
            PublishError::Broker(e) => write!(f, "publish failed: {}", e),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublishError::Broker(e) => Some(e),
            PublishError::Serialization(e) => Some(e),
            PublishError::MissingTarget => None,
        }
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err)
    }
}

impl From<BrokerError> for PublishError {
    fn from(err: BrokerError) -> Self {
        PublishError::Broker(err)
    }
}

/// Trait for publishing records to the broker.
pub trait MessagePublisher: Send + Sync {
    /// Publish a record. Either the record is fully published and every
    /// resource released, or an error is returned with resources released.
    fn send_message(&self, request: SendMessage) -> Result<(), PublishError>;
}

impl<T: MessagePublisher + ?Sized> MessagePublisher for std::sync::Arc<T> {
    fn send_message(&self, request: SendMessage) -> Result<(), PublishError> {
        (**self).send_message(request)
    }
}
