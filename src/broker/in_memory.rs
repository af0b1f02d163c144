//! In-memory broker for testing and single-process scenarios.
//!
//! Models the parts of a fanout broker the adapter relies on:
//! - fanout exchanges copying each message to every bound queue
//! - named queues with competing consumers
//! - unacked deliveries, ack, and nack with or without requeue
//! - channel open/close accounting, so connection leaks are observable

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{BrokerChannel, BrokerError, ChannelProvider, Delivery, Topology};

#[derive(Default)]
struct State {
    /// Exchange name -> bound queues
    exchanges: HashMap<String, Vec<String>>,
    /// Ready messages per queue: (body, redelivered)
    queues: HashMap<String, VecDeque<(Vec<u8>, bool)>>,
    /// Every message accepted by an exchange, in order
    published: Vec<(String, Vec<u8>)>,
    unacked: HashMap<u64, Delivery>,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
    next_tag: u64,
    open_channels: usize,
    opened_total: usize,
    failing_publishes: usize,
    failing_opens: usize,
}

impl State {
    fn declare_queue(&mut self, queue: &str) {
        self.queues.entry(queue.to_string()).or_default();
    }

    fn take_publish_failure(&mut self) -> bool {
        if self.failing_publishes > 0 {
            self.failing_publishes -= 1;
            true
        } else {
            false
        }
    }
}

/// In-memory fanout broker.
///
/// Cheap to clone; clones share the same state, so a test can keep one handle
/// for inspection while the consumer and publisher use others.
///
/// ## Example
///
/// ```
/// use fanout_adapter::broker::{BrokerChannel, ChannelProvider, InMemoryBroker, Topology};
///
/// let broker = InMemoryBroker::new();
/// let channel = broker
///     .open(&Topology::fanout("orders", vec!["billing.orders".into()]))
///     .unwrap();
///
/// channel.publish("orders", br#"{"orderId":1}"#).unwrap();
///
/// let delivery = channel.poll("billing.orders", 10).unwrap().unwrap();
/// channel.ack(&delivery).unwrap();
/// channel.close().unwrap();
///
/// assert_eq!(broker.acked(), vec![delivery.tag]);
/// assert_eq!(broker.open_channels(), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a raw message straight onto a queue, as an upstream producer would.
    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back((body.into(), false));
    }

    /// Number of messages ready on a queue (not counting unacked ones).
    pub fn ready(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Ready payloads on a queue, parsed as JSON.
    pub fn queue_messages(&self, queue: &str) -> Vec<Value> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|(body, _)| parse(body)).collect())
            .unwrap_or_default()
    }

    /// Every message accepted by `exchange`, parsed as JSON.
    pub fn exchange_messages(&self, exchange: &str) -> Vec<Value> {
        self.state()
            .published
            .iter()
            .filter(|(name, _)| name == exchange)
            .map(|(_, body)| parse(body))
            .collect()
    }

    /// Queues bound to `exchange`.
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.state()
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state().exchanges.contains_key(exchange)
    }

    /// Delivery tags acknowledged so far.
    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    /// Delivery tags rejected so far, with their requeue flag.
    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.state().nacked.clone()
    }

    /// Deliveries handed out but not yet settled.
    pub fn unacked(&self) -> usize {
        self.state().unacked.len()
    }

    /// Channels currently open.
    pub fn open_channels(&self) -> usize {
        self.state().open_channels
    }

    /// Channels opened over the broker's lifetime.
    pub fn opened_total(&self) -> usize {
        self.state().opened_total
    }

    /// Make the next `count` publish / send-to-queue calls fail.
    pub fn fail_publishes(&self, count: usize) {
        self.state().failing_publishes = count;
    }

    /// Make the next `count` channel opens fail.
    pub fn fail_opens(&self, count: usize) {
        self.state().failing_opens = count;
    }
}

fn parse(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

impl ChannelProvider for InMemoryBroker {
    type Channel = InMemoryChannel;

    fn open(&self, topology: &Topology) -> Result<InMemoryChannel, BrokerError> {
        let mut state = self.state();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(BrokerError::ConnectionFailed("broker unavailable".into()));
        }

        for queue in &topology.queues {
            state.declare_queue(queue);
        }
        if let Some(exchange) = &topology.exchange {
            let bound = state.exchanges.entry(exchange.clone()).or_default();
            for queue in &topology.queues {
                if !bound.contains(queue) {
                    bound.push(queue.clone());
                }
            }
        }

        state.open_channels += 1;
        state.opened_total += 1;

        Ok(InMemoryChannel {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// A channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    fn settle(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        match state.unacked.remove(&delivery.tag) {
            Some(_) => Ok(()),
            None => Err(BrokerError::Rejected(format!(
                "unknown delivery tag {}",
                delivery.tag
            ))),
        }
    }
}

impl BrokerChannel for InMemoryChannel {
    fn assert_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .state()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        if state.take_publish_failure() {
            return Err(BrokerError::Rejected(format!("publish to {} failed", exchange)));
        }
        let bound = state
            .exchanges
            .get(exchange)
            .cloned()
            .ok_or_else(|| BrokerError::Rejected(format!("no exchange '{}'", exchange)))?;
        for queue in bound {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back((body.to_vec(), false));
        }
        state.published.push((exchange.to_string(), body.to_vec()));
        Ok(())
    }

    fn send_to_queue(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state();
        if state.take_publish_failure() {
            return Err(BrokerError::Rejected(format!("send to {} failed", queue)));
        }
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back((body.to_vec(), false));
        Ok(())
    }

    fn poll(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            self.ensure_open()?;
            {
                let mut state = self.broker.state();
                let next = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?
                    .pop_front();

                if let Some((body, redelivered)) = next {
                    state.next_tag += 1;
                    let mut delivery = Delivery::new(state.next_tag, queue, body);
                    delivery.redelivered = redelivered;
                    state.unacked.insert(delivery.tag, delivery.clone());
                    return Ok(Some(delivery));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        self.broker.state().acked.push(delivery.tag);
        Ok(())
    }

    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery)?;
        let mut state = self.broker.state();
        state.nacked.push((delivery.tag, requeue));
        if requeue {
            state
                .queues
                .entry(delivery.queue.clone())
                .or_default()
                .push_front((delivery.body.clone(), true));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        let mut state = self.broker.state();
        state.open_channels = state.open_channels.saturating_sub(1);
        Ok(())
    }
}
