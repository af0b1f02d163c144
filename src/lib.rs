//! Message-queue consumption and publication adapters for fanout brokers.
//!
//! - [`Consumer::spawn`] reads one message at a time off `<service>.<queue>`,
//!   dispatches it to a [`MessageHandler`], settles it with exactly one ack or
//!   nack, and signals the outcome on `success.messages` / `error.messages`.
//! - [`BrokerPublisher`] tags outbound records with the service identity and
//!   a lineage id, and either fans them out on an exchange or sends them to a
//!   queue.
//!
//! The broker itself sits behind [`broker::ChannelProvider`]; an in-memory
//! implementation ships behind the default `in-memory` feature.

pub mod broker;
pub mod consumer;
mod error_handler;
mod identity;
mod logger;
pub mod publisher;
mod record;

pub use consumer::{
    consume, Acknowledgment, BatchStrategy, ConsumeError, Consumer, ConsumerHandle,
    ConsumerOptions, ConsumerStats, HandlerError, MessageHandler,
};
pub use error_handler::{
    flatten_validation_errors, AppError, ErrorHandler, ErrorNormalizer, NormalizedError,
    ValidationError,
};
pub use identity::{IdentityError, ServiceIdentity, ERROR_EXCHANGE, SUCCESS_EXCHANGE};
pub use logger::{BufferLogger, Level, LogEntry, Logger, TracingLogger};
pub use publisher::{BrokerPublisher, MessagePublisher, PublishConfig, PublishError, SendMessage};
pub use record::{DecodeError, Envelope, ErrorRecord, Record, SuccessEcho};
