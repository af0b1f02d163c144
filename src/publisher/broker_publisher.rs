//! Channel-per-call publisher.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::{MessagePublisher, PublishConfig, PublishError, SendMessage, Target};
use crate::broker::{BrokerChannel, BrokerError, ChannelProvider, Topology};
use crate::identity::ServiceIdentity;
use crate::logger::Logger;
use crate::record::{Record, MESSAGE_ORIGIN, PROCESS_UID};

/// Publishes records through channels opened from a [`ChannelProvider`].
///
/// Stateless per call: every `send_message` opens its own channel and closes
/// it before returning, whether or not the publish succeeded.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use fanout_adapter::broker::InMemoryBroker;
/// use fanout_adapter::{BrokerPublisher, BufferLogger, MessagePublisher, Record, SendMessage, ServiceIdentity};
///
/// let broker = InMemoryBroker::new();
/// let publisher = BrokerPublisher::new(
///     broker.clone(),
///     ServiceIdentity::new("orders"),
///     Arc::new(BufferLogger::new()),
/// );
///
/// publisher
///     .send_message(SendMessage::to_exchange("orders.created", Record::new().with_field("orderId", 42)))
///     .unwrap();
///
/// let sent = broker.exchange_messages("orders.created");
/// assert_eq!(sent[0]["messageOrigin"], "orders");
/// assert!(sent[0]["habitarProcessUid"].is_string());
/// assert_eq!(broker.open_channels(), 0);
/// ```
pub struct BrokerPublisher<P> {
    provider: P,
    identity: ServiceIdentity,
    logger: Arc<dyn Logger>,
}

impl<P: ChannelProvider> BrokerPublisher<P> {
    pub fn new(provider: P, identity: ServiceIdentity, logger: Arc<dyn Logger>) -> Self {
        Self {
            provider,
            identity,
            logger,
        }
    }

    /// Apply origin tagging and the assign-once process uid.
    fn stamp(&self, message: &mut Record, config: PublishConfig) {
        if config.auto_set_origin {
            message.insert(MESSAGE_ORIGIN, Value::from(self.identity.as_str()));
        }
        if message.process_uid().is_none() {
            message.insert(PROCESS_UID, Value::from(Uuid::new_v4().to_string()));
        }
    }
}

fn deliver<C: BrokerChannel>(channel: &C, target: &Target, body: &[u8]) -> Result<(), BrokerError> {
    match target {
        Target::Exchange(exchange) => {
            channel.assert_exchange(exchange)?;
            channel.publish(exchange, body)
        }
        Target::Queue(queue) => channel.send_to_queue(queue, body),
    }
}

impl<P: ChannelProvider> MessagePublisher for BrokerPublisher<P> {
    fn send_message(&self, request: SendMessage) -> Result<(), PublishError> {
        let target = request.target()?;
        let SendMessage {
            mut message,
            config,
            ..
        } = request;

        self.stamp(&mut message, config);
        let body = serde_json::to_vec(&message)?;

        let channel = self.provider.open(&Topology::none())?;
        let published = deliver(&channel, &target, &body);
        let closed = channel.close();
        published?;
        closed?;

        let (kind, name) = match &target {
            Target::Exchange(exchange) => ("exchange", exchange),
            Target::Queue(queue) => ("queue", queue),
        };
        self.logger.info(
            &format!("+ New message on {} \"{}\"", kind, name),
            json!({
                "kind": kind,
                "target": name,
                "habitarProcessUid": message.habitar_process_uid,
            }),
        );
        Ok(())
    }
}
