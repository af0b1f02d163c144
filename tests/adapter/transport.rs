//! Consume loop lifecycle and failure handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fanout_adapter::broker::BrokerError;
use fanout_adapter::{
    consume, BatchStrategy, ConsumeError, Consumer, HandlerError, Level, Record, ServiceIdentity,
};

use crate::support::{eventually, options, Recorder, Wiring, EXCHANGE, QUEUE_NAME, SERVICE};

#[test]
fn binds_namespaced_queue_to_exchange() {
    let wiring = Wiring::new();
    let handle = consume(wiring.consumer(Recorder::default(), options()), &wiring.broker).unwrap();

    assert_eq!(handle.queue(), QUEUE_NAME);
    assert_eq!(wiring.broker.bindings(EXCHANGE), vec![QUEUE_NAME.to_string()]);
    assert_eq!(wiring.broker.open_channels(), 1);

    thread::sleep(Duration::from_millis(20));
    let stats = handle.stop();
    assert!(stats.polls > 0);
    assert_eq!(wiring.broker.open_channels(), 0);
}

#[test]
fn spawn_starts_consuming_immediately() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    wiring.broker.push(QUEUE_NAME, r#"{"orderId":1}"#);

    let handle = Consumer::spawn(
        recorder.clone(),
        wiring.publisher.clone(),
        Arc::new(wiring.logger.clone()),
        &wiring.broker,
        ServiceIdentity::new(SERVICE),
        options(),
    )
    .unwrap();

    assert_eq!(handle.queue(), QUEUE_NAME);
    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    assert_eq!(recorder.seen().len(), 1);
}

#[test]
fn setup_failure_is_returned() {
    let wiring = Wiring::new();
    wiring.broker.fail_opens(1);

    let result = consume(wiring.consumer(Recorder::default(), options()), &wiring.broker);

    match result {
        Err(ConsumeError::Setup { queue, source }) => {
            assert_eq!(queue, QUEUE_NAME);
            assert!(matches!(source, BrokerError::ConnectionFailed(_)));
        }
        Ok(_) => panic!("expected setup failure"),
    }
}

#[test]
fn bad_message_does_not_stop_the_loop() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring.broker.push(QUEUE_NAME, r#"{"fail":true}"#);
    wiring.broker.push(QUEUE_NAME, "not json");
    wiring.broker.push(QUEUE_NAME, "");
    wiring.broker.push(QUEUE_NAME, r#"{"orderId":1}"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    assert_eq!(stats.nacked, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(recorder.seen().len(), 2);
    assert_eq!(wiring.logger.at(Level::Warn).len(), 1);
}

#[test]
fn requeue_on_error_redelivers() {
    let wiring = Wiring::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let handler = move |_: &Record| -> Result<(), HandlerError> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("transient".into())
        } else {
            Ok(())
        }
    };
    let handle = consume(
        wiring.consumer(handler, options().requeue_on_error(true)),
        &wiring.broker,
    )
    .unwrap();

    wiring.broker.push(QUEUE_NAME, r#"{"orderId":1,"requeueUid":"r1"}"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.nacked, 1);
    assert_eq!(stats.acked, 1);
    assert!(wiring.broker.nacked()[0].1);
}

#[test]
fn reenqueued_batch_items_are_consumed_individually() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(
        wiring.consumer(
            recorder.clone(),
            options().batch_strategy(BatchStrategy::Reenqueue),
        ),
        &wiring.broker,
    )
    .unwrap();

    wiring.broker.push(QUEUE_NAME, r#"[{"a":1},{"b":2}]"#);

    assert!(eventually(|| wiring.broker.acked().len() == 3));
    let stats = handle.stop();

    assert_eq!(stats.acked, 3);
    assert_eq!(recorder.seen().len(), 2);
}

#[test]
fn dropping_the_handle_stops_the_loop() {
    let wiring = Wiring::new();
    let handle = consume(wiring.consumer(Recorder::default(), options()), &wiring.broker).unwrap();

    drop(handle);

    assert!(eventually(|| wiring.broker.open_channels() == 0));
    thread::sleep(Duration::from_millis(20));
    wiring.broker.push(QUEUE_NAME, r#"{"orderId":1}"#);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(wiring.broker.ready(QUEUE_NAME), 1);
}

#[test]
fn panicking_handler_does_not_stop_the_loop() {
    let wiring = Wiring::new();
    let handler = |record: &Record| -> Result<(), HandlerError> {
        if record.get("boom").is_some() {
            panic!("handler bug");
        }
        Ok(())
    };
    let handle = consume(wiring.consumer(handler, options()), &wiring.broker).unwrap();

    wiring.broker.push(QUEUE_NAME, r#"{"boom":1}"#);
    wiring.broker.push(QUEUE_NAME, r#"{"orderId":1}"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.nacked, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(wiring.broker.unacked(), 0);
    assert_eq!(wiring.broker.ready(QUEUE_NAME), 0);
    let errors = wiring.broker.exchange_messages(fanout_adapter::ERROR_EXCHANGE);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error"]["message"], "handler panicked: handler bug");
}

#[test]
fn own_echoes_are_counted_as_skipped() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring
        .broker
        .push(QUEUE_NAME, r#"{"orderId":1,"messageOrigin":"billing"}"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.skipped_self, 1);
    assert_eq!(stats.acked, 1);
    assert!(recorder.seen().is_empty());
}
