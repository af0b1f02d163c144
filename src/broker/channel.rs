//! Channel and provider traits.

use super::BrokerError;

/// The exchange/queue topology a channel should be bound to.
///
/// When `exchange` is set, the provider declares it as a fanout exchange and
/// binds every queue in `queues` to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchange: Option<String>,
    pub queues: Vec<String>,
}

impl Topology {
    /// No bindings; used by publishers that assert what they need themselves.
    pub fn none() -> Self {
        Self::default()
    }

    /// A fanout exchange with the given bound queues.
    pub fn fanout(exchange: impl Into<String>, queues: Vec<String>) -> Self {
        Self {
            exchange: Some(exchange.into()),
            queues,
        }
    }
}

/// A message delivered by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Delivery tag, unique per channel. Used for ack/nack.
    pub tag: u64,
    /// The queue the message was delivered from.
    pub queue: String,
    /// Raw payload bytes.
    pub body: Vec<u8>,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
}

impl Delivery {
    /// A first delivery of `body` from `queue`.
    pub fn new(tag: u64, queue: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            tag,
            queue: queue.into(),
            body,
            redelivered: false,
        }
    }
}

/// An open broker channel.
///
/// Implementations must be safe to share across threads: the consumer acks
/// from its delivery loop while publishers may use their own channels
/// concurrently.
pub trait BrokerChannel: Send + Sync {
    /// Declare a fanout exchange. Idempotent.
    fn assert_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    /// Publish to every queue bound to `exchange`.
    fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Send directly to a named queue (point-to-point).
    fn send_to_queue(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Wait for the next delivery on `queue`, up to `timeout_ms`.
    fn poll(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery; the broker drops it.
    fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Reject a delivery; the broker requeues it when `requeue` is set,
    /// otherwise discards (or dead-letters) it.
    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;

    /// Close the channel and its connection.
    fn close(&self) -> Result<(), BrokerError>;
}

/// Opens channels bound to a topology.
///
/// Credentials, heartbeats and reconnection belong to the provider; errors
/// from `open` are fatal to whoever asked for the channel.
pub trait ChannelProvider: Send + Sync {
    type Channel: BrokerChannel + 'static;

    fn open(&self, topology: &Topology) -> Result<Self::Channel, BrokerError>;
}
