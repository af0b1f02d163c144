//! The per-delivery protocol.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use super::handler::{HandlerError, MessageHandler};
use super::options::{BatchStrategy, ConsumerOptions};
use super::transport::{consume, ConsumeError, ConsumerHandle};
use crate::broker::{BrokerChannel, BrokerError, ChannelProvider, Delivery};
use crate::error_handler::{ErrorHandler, ErrorNormalizer};
use crate::identity::{ServiceIdentity, ERROR_EXCHANGE, SUCCESS_EXCHANGE};
use crate::logger::Logger;
use crate::publisher::{MessagePublisher, SendMessage};
use crate::record::{Envelope, ErrorRecord, Record, SuccessEcho};

/// Delay before retrying an error-record publish, multiplied by the attempt.
const ERROR_PUBLISH_BACKOFF: Duration = Duration::from_millis(25);

/// The single settlement issued for a broker delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    Ack,
    NackRequeue,
    NackDiscard,
}

/// What a single delivery amounted to, beyond its settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Report {
    pub ack: Acknowledgment,
    /// Records skipped because this service published them.
    pub skipped_self: usize,
    /// The payload was empty or undecodable.
    pub dropped: bool,
}

impl Report {
    fn settled(ack: Acknowledgment) -> Self {
        Self {
            ack,
            skipped_self: 0,
            dropped: false,
        }
    }

    fn dropped() -> Self {
        Self {
            ack: Acknowledgment::NackDiscard,
            skipped_self: 0,
            dropped: true,
        }
    }
}

/// What happened to one record.
enum Outcome {
    SelfOrigin,
    Succeeded(Record),
    Failed(Record, HandlerError),
}

/// Dispatches consumed records to a business handler.
///
/// Holds only immutable configuration, so one consumer can serve concurrent
/// deliveries without locking.
pub struct Consumer<H, P> {
    handler: H,
    publisher: P,
    logger: Arc<dyn Logger>,
    normalizer: Arc<dyn ErrorNormalizer>,
    identity: ServiceIdentity,
    options: ConsumerOptions,
    queue_name: String,
}

impl<H, P> Consumer<H, P>
where
    H: MessageHandler + 'static,
    P: MessagePublisher + 'static,
{
    /// Build a consumer and start consuming `<service>.<queue>` right away.
    ///
    /// Fails only if the queue cannot be bound; see [`consume`].
    pub fn spawn<C: ChannelProvider>(
        handler: H,
        publisher: P,
        logger: Arc<dyn Logger>,
        provider: &C,
        identity: ServiceIdentity,
        options: ConsumerOptions,
    ) -> Result<ConsumerHandle, ConsumeError> {
        let consumer = Self::new(handler, publisher, logger, identity, options);
        consume(Arc::new(consumer), provider)
    }
}

impl<H: MessageHandler, P: MessagePublisher> Consumer<H, P> {
    pub fn new(
        handler: H,
        publisher: P,
        logger: Arc<dyn Logger>,
        identity: ServiceIdentity,
        options: ConsumerOptions,
    ) -> Self {
        let queue_name = identity.queue_name(&options.queue);
        Self {
            handler,
            publisher,
            logger,
            normalizer: Arc::new(ErrorHandler),
            identity,
            options,
            queue_name,
        }
    }

    /// Replace the default [`ErrorHandler`].
    pub fn with_error_handler(mut self, normalizer: impl ErrorNormalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// The namespaced queue this consumer reads, `<service>.<queue>`.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub(crate) fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// Run the full protocol for one delivery and settle it exactly once.
    ///
    /// Returns the settlement issued, or the broker error if issuing it
    /// failed. Handler failures never surface here; they are settled, logged
    /// and published to `error.messages`.
    pub fn process_delivery<C: BrokerChannel + ?Sized>(
        &self,
        channel: &C,
        delivery: Delivery,
    ) -> Result<Acknowledgment, BrokerError> {
        self.process(channel, delivery).map(|report| report.ack)
    }

    pub(crate) fn process<C: BrokerChannel + ?Sized>(
        &self,
        channel: &C,
        delivery: Delivery,
    ) -> Result<Report, BrokerError> {
        let envelope = match Envelope::decode(&delivery.body) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                self.logger.warn(
                    "Discarding empty message.",
                    json!({ "queue": self.queue_name, "tag": delivery.tag }),
                );
                return settle(channel, &delivery, Report::dropped());
            }
            Err(err) => {
                self.logger.error(
                    "Discarding undecodable message.",
                    json!({
                        "queue": self.queue_name,
                        "tag": delivery.tag,
                        "message": String::from_utf8_lossy(&delivery.body),
                        "error": err.to_string(),
                    }),
                );
                return settle(channel, &delivery, Report::dropped());
            }
        };

        let outcomes = match envelope {
            Envelope::Single(record) => vec![self.dispatch(record)],
            Envelope::Batch(records) => match self.options.batch_strategy {
                BatchStrategy::Inline => records.into_iter().map(|r| self.dispatch(r)).collect(),
                BatchStrategy::Reenqueue => {
                    let ack = match self.reenqueue(channel, &records) {
                        Ok(()) => Acknowledgment::Ack,
                        Err(_) => self.failure_ack(),
                    };
                    return settle(channel, &delivery, Report::settled(ack));
                }
            },
        };

        let ack = if outcomes.iter().any(|o| matches!(o, Outcome::Failed(..))) {
            self.failure_ack()
        } else {
            Acknowledgment::Ack
        };
        let report = Report {
            ack,
            skipped_self: outcomes
                .iter()
                .filter(|o| matches!(o, Outcome::SelfOrigin))
                .count(),
            dropped: false,
        };
        let settled = settle(channel, &delivery, report);

        for outcome in outcomes {
            match outcome {
                Outcome::SelfOrigin => {}
                Outcome::Succeeded(record) => self.on_success(&record),
                Outcome::Failed(record, err) => self.on_failure(&record, &err),
            }
        }

        settled
    }

    fn failure_ack(&self) -> Acknowledgment {
        if self.options.requeue_on_error {
            Acknowledgment::NackRequeue
        } else {
            Acknowledgment::NackDiscard
        }
    }

    fn dispatch(&self, record: Record) -> Outcome {
        if self.identity.is_self(record.message_origin.as_deref()) {
            return Outcome::SelfOrigin;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handler.execute(&record)))
            .unwrap_or_else(|payload| Err(panic_error(payload)));
        match result {
            Ok(()) => Outcome::Succeeded(record),
            Err(err) => Outcome::Failed(record, err),
        }
    }

    /// Send each batch item back to this consumer's queue as its own message.
    fn reenqueue<C: BrokerChannel + ?Sized>(
        &self,
        channel: &C,
        records: &[Record],
    ) -> Result<(), BrokerError> {
        for record in records {
            if let Err(err) = channel.send_to_queue(&self.queue_name, &record.to_json_bytes()) {
                self.logger.error(
                    "Fail when re-enqueueing batch item.",
                    json!({
                        "exchange": self.options.exchange,
                        "queue": self.queue_name,
                        "message": record.to_json_string(),
                        "error": err.to_string(),
                    }),
                );
                return Err(err);
            }
        }
        Ok(())
    }

    fn on_success(&self, record: &Record) {
        if let Some(echo) = SuccessEcho::for_record(record) {
            let uid = echo.requeue_uid.clone();
            let request = SendMessage::to_exchange(SUCCESS_EXCHANGE, Record::from(echo));
            if let Err(err) = self.publisher.send_message(request) {
                self.logger.error(
                    "Fail when publishing success echo.",
                    json!({ "requeueUid": uid, "error": err.to_string() }),
                );
            }
        }
        self.logger.info(&self.options.success_message, record.to_value());
    }

    fn on_failure(&self, record: &Record, err: &HandlerError) {
        let normalized = self.normalizer.normalize(err);
        let error_record = ErrorRecord::new(
            record,
            self.identity.as_str(),
            self.queue_name.as_str(),
            normalized,
        );

        self.publish_error_record(Record::from(error_record));

        self.logger.error(
            "Fail when consuming message from queue.",
            json!({
                "exchange": self.options.exchange,
                "queue": self.queue_name,
                "message": record.to_json_string(),
                "error": err.to_string(),
            }),
        );
    }

    /// Publish to `error.messages`, retrying a bounded number of times. When
    /// every attempt fails the record is written to the log instead.
    fn publish_error_record(&self, error_record: Record) {
        let attempts = self.options.error_publish_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let request = SendMessage::to_exchange(ERROR_EXCHANGE, error_record.clone());
            match self.publisher.send_message(request) {
                Ok(()) => return,
                Err(err) => {
                    last_error = Some(err.to_string());
                    if attempt < attempts {
                        thread::sleep(ERROR_PUBLISH_BACKOFF * attempt);
                    }
                }
            }
        }

        self.logger.error(
            "Dead-lettering error record after failed publish.",
            json!({
                "attempts": attempts,
                "error": last_error.map_or(Value::Null, Value::String),
                "record": error_record.to_value(),
            }),
        );
    }
}

fn settle<C: BrokerChannel + ?Sized>(
    channel: &C,
    delivery: &Delivery,
    report: Report,
) -> Result<Report, BrokerError> {
    match report.ack {
        Acknowledgment::Ack => channel.ack(delivery)?,
        Acknowledgment::NackRequeue => channel.nack(delivery, true)?,
        Acknowledgment::NackDiscard => channel.nack(delivery, false)?,
    }
    Ok(report)
}

/// A handler panic, as a handler failure.
fn panic_error(payload: Box<dyn Any + Send>) -> HandlerError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    HandlerError::from(format!("handler panicked: {}", detail))
}
