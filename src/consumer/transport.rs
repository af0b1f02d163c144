//! Background consume loop.

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

use super::consumer::{Acknowledgment, Consumer, Report};
use super::handler::MessageHandler;
use crate::broker::{BrokerChannel, BrokerError, ChannelProvider, Topology};
use crate::publisher::MessagePublisher;

/// Error starting a consumer.
#[derive(Debug)]
pub enum ConsumeError {
    /// The provider could not open a channel bound to the consumer's topology.
    Setup { queue: String, source: BrokerError },
}

impl fmt::Display for ConsumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeError::Setup { queue, source } => {
                write!(f, "failed to set up consumer for {}: {}", queue, source)
            }
        }
    }
}

impl Error for ConsumeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConsumeError::Setup { source, .. } => Some(source),
        }
    }
}

/// Statistics from a consume loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Poll cycles completed.
    pub polls: usize,
    /// Deliveries acknowledged.
    pub acked: usize,
    /// Deliveries rejected (requeued or discarded).
    pub nacked: usize,
    /// Records skipped because this service published them.
    pub skipped_self: usize,
    /// Deliveries discarded as empty or undecodable.
    pub dropped: usize,
    /// Deliveries whose ack/nack the broker refused.
    pub settle_errors: usize,
}

impl ConsumerStats {
    fn record(&mut self, report: Report) {
        match report.ack {
            Acknowledgment::Ack => self.acked += 1,
            Acknowledgment::NackRequeue | Acknowledgment::NackDiscard => self.nacked += 1,
        }
        self.skipped_self += report.skipped_self;
        if report.dropped {
            self.dropped += 1;
        }
    }
}

/// Handle to a background consume loop. Drop or call `stop()` to shut down.
pub struct ConsumerHandle {
    queue: String,
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerHandle {
    /// The namespaced queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stop the loop and wait for it to finish. Returns stats.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ConsumerStats::default(),
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Bind a consumer to its queue and start consuming immediately.
///
/// Opens a channel for `{exchange, [<service>.<queue>]}` before returning, so
/// topology failures surface here as [`ConsumeError::Setup`]. The loop then
/// runs on a background thread, polling one delivery at a time and running
/// [`Consumer::process_delivery`] for each. Handler failures never end the
/// loop; it ends when stopped or when the channel is closed under it.
///
/// Several consumers started on the same queue compete for its messages.
pub fn consume<H, P, C>(
    consumer: Arc<Consumer<H, P>>,
    provider: &C,
) -> Result<ConsumerHandle, ConsumeError>
where
    H: MessageHandler + 'static,
    P: MessagePublisher + 'static,
    C: ChannelProvider,
{
    let queue = consumer.queue_name().to_string();
    let topology = Topology::fanout(consumer.options().exchange.clone(), vec![queue.clone()]);
    let channel = provider
        .open(&topology)
        .map_err(|source| ConsumeError::Setup {
            queue: queue.clone(),
            source,
        })?;

    let poll_timeout_ms = consumer.options().poll_interval_ms;
    let poll_interval = Duration::from_millis(poll_timeout_ms);
    let (stop_tx, stop_rx) = mpsc::channel();
    let loop_queue = queue.clone();

    let handle = thread::spawn(move || {
        let mut stats = ConsumerStats::default();

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            stats.polls += 1;

            match channel.poll(&loop_queue, poll_timeout_ms) {
                Ok(Some(delivery)) => match consumer.process(&channel, delivery) {
                    Ok(report) => stats.record(report),
                    Err(err) => {
                        stats.settle_errors += 1;
                        consumer.logger().error(
                            "Fail when settling message.",
                            json!({ "queue": loop_queue, "error": err.to_string() }),
                        );
                    }
                },
                Ok(None) => {}
                Err(BrokerError::ChannelClosed) => {
                    consumer.logger().error(
                        "Consumer channel closed.",
                        json!({ "queue": loop_queue }),
                    );
                    return stats;
                }
                Err(err) => {
                    consumer.logger().warn(
                        "Fail when polling queue.",
                        json!({ "queue": loop_queue, "error": err.to_string() }),
                    );
                    thread::sleep(poll_interval);
                }
            }
        }

        if let Err(err) = channel.close() {
            consumer.logger().warn(
                "Fail when closing consumer channel.",
                json!({ "queue": loop_queue, "error": err.to_string() }),
            );
        }
        stats
    });

    Ok(ConsumerHandle {
        queue,
        stop_tx,
        handle: Some(handle),
    })
}
