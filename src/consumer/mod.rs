//! Consume-dispatch-acknowledge.
//!
//! A [`Consumer`] owns the per-message protocol: decode the payload, skip the
//! service's own fanout echoes, run the business handler, settle the delivery
//! with exactly one ack or nack, then emit the success echo or error record.
//! [`Consumer::spawn`] binds a new consumer to its broker queue and runs it on
//! a background thread; [`consume`] does the same for a consumer built with
//! [`Consumer::new`], e.g. one given a custom error handler.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fanout_adapter::*;
//!
//! let identity = ServiceIdentity::from_env()?;
//! let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
//! let publisher = Arc::new(BrokerPublisher::new(broker.clone(), identity.clone(), logger.clone()));
//!
//! let handle = Consumer::spawn(
//!     |record: &Record| -> Result<(), HandlerError> { create_invoice(record) },
//!     publisher,
//!     logger,
//!     &broker,
//!     identity,
//!     ConsumerOptions::new("orders.created", "invoices", "Invoice created"),
//! )?;
//! // ...
//! let stats = handle.stop();
//! ```

mod consumer;
mod handler;
mod options;
mod transport;

pub use consumer::{Acknowledgment, Consumer};
pub use handler::{HandlerError, MessageHandler};
pub use options::{BatchStrategy, ConsumerOptions};
pub use transport::{consume, ConsumeError, ConsumerHandle, ConsumerStats};
