//! The business handler a consumer dispatches to, and its error type.

use std::error::Error;
use std::fmt;

use crate::error_handler::AppError;
use crate::record::Record;

/// Error type for business handler failures.
#[derive(Debug)]
pub enum HandlerError {
    /// Deliberate business failure, optionally carrying a validation tree.
    App(AppError),
    /// The record did not have the shape the handler expects.
    Decode(String),
    /// Any other failure.
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap an arbitrary error.
    pub fn other(err: impl Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::App(app) => app.status_code,
            HandlerError::Decode(_) => 400,
            HandlerError::Other(_) => 500,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::App(app) => write!(f, "{}", app),
            HandlerError::Decode(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Other(e) => e.source(),
            _ => None,
        }
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        HandlerError::App(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Decode(err.to_string())
    }
}

impl From<Box<dyn Error + Send + Sync>> for HandlerError {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self {
        HandlerError::Other(err)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Other(msg.into())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Other(msg.into())
    }
}

/// A use-case invoked once per consumed record.
///
/// Handlers must tolerate at-least-once delivery: a nack with requeue, or a
/// broker redelivery, runs the same record again.
///
/// Any `Fn(&Record) -> Result<(), HandlerError>` is a handler:
///
/// ```
/// use fanout_adapter::{HandlerError, MessageHandler, Record};
///
/// let handler = |record: &Record| -> Result<(), HandlerError> {
///     record.get("orderId").ok_or("missing orderId")?;
///     Ok(())
/// };
///
/// assert!(handler.execute(&Record::new().with_field("orderId", 42)).is_ok());
/// assert!(handler.execute(&Record::new()).is_err());
/// ```
pub trait MessageHandler: Send + Sync {
    fn execute(&self, record: &Record) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Record) -> Result<(), HandlerError> + Send + Sync,
{
    fn execute(&self, record: &Record) -> Result<(), HandlerError> {
        self(record)
    }
}
