//! Shared wiring for adapter tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fanout_adapter::broker::InMemoryBroker;
use fanout_adapter::{
    BrokerPublisher, BufferLogger, Consumer, ConsumerOptions, HandlerError, MessageHandler,
    Record, ServiceIdentity,
};

pub const SERVICE: &str = "billing";
pub const EXCHANGE: &str = "orders.created";
pub const QUEUE: &str = "invoices";
pub const QUEUE_NAME: &str = "billing.invoices";

pub type Publisher = Arc<BrokerPublisher<InMemoryBroker>>;

/// Broker, publisher and loggers for one test. The consumer and the
/// publisher log into separate buffers.
pub struct Wiring {
    pub broker: InMemoryBroker,
    pub logger: BufferLogger,
    pub publisher_logger: BufferLogger,
    pub publisher: Publisher,
}

impl Wiring {
    pub fn new() -> Self {
        let broker = InMemoryBroker::new();
        let publisher_logger = BufferLogger::new();
        let publisher = Arc::new(BrokerPublisher::new(
            broker.clone(),
            ServiceIdentity::new(SERVICE),
            Arc::new(publisher_logger.clone()),
        ));
        Self {
            broker,
            logger: BufferLogger::new(),
            publisher_logger,
            publisher,
        }
    }

    pub fn consumer<H: MessageHandler>(
        &self,
        handler: H,
        options: ConsumerOptions,
    ) -> Arc<Consumer<H, Publisher>> {
        Arc::new(Consumer::new(
            handler,
            self.publisher.clone(),
            Arc::new(self.logger.clone()),
            ServiceIdentity::new(SERVICE),
            options,
        ))
    }
}

pub fn options() -> ConsumerOptions {
    ConsumerOptions::new(EXCHANGE, QUEUE, "Invoice created").poll_interval(Duration::from_millis(5))
}

/// Records every record it sees; fails those carrying `"fail": true`.
#[derive(Clone, Default)]
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<Record>>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<Record> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageHandler for Recorder {
    fn execute(&self, record: &Record) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(record.clone());
        match record.get("fail") {
            Some(serde_json::Value::Bool(true)) => Err("bad input".into()),
            _ => Ok(()),
        }
    }
}

/// Poll `condition` until it holds or a second passes.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
