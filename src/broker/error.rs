//! Error type for broker operations.

use std::error::Error;
use std::fmt;

/// Error raised by a broker channel or channel provider.
#[derive(Debug)]
pub enum BrokerError {
    /// Connecting to the broker failed.
    ConnectionFailed(String),
    /// The channel was used after it was closed.
    ChannelClosed,
    /// The named queue does not exist.
    UnknownQueue(String),
    /// The broker refused the operation.
    Rejected(String),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::UnknownQueue(queue) => write!(f, "unknown queue: {}", queue),
            BrokerError::Rejected(msg) => write!(f, "rejected by broker: {}", msg),
            BrokerError::Other(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
