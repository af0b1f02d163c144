//! End-to-end scenarios for the consume-dispatch-acknowledge protocol.

use fanout_adapter::{consume, Level, ERROR_EXCHANGE, SUCCESS_EXCHANGE};
use uuid::Uuid;

use crate::support::{eventually, options, Recorder, Wiring, QUEUE_NAME};

#[test]
fn success_with_requeue_uid() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring
        .broker
        .push(QUEUE_NAME, r#"{"orderId":42,"requeueUid":"r1"}"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    assert!(eventually(|| !wiring.logger.entries().is_empty()));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    assert_eq!(stats.nacked, 0);
    assert_eq!(recorder.seen().len(), 1);

    let echoes = wiring.broker.exchange_messages(SUCCESS_EXCHANGE);
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0]["requeueUid"], "r1");
    assert_eq!(echoes[0]["messageOrigin"], "billing");

    let logs = wiring.logger.entries();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, Level::Info);
    assert_eq!(logs[0].message, "Invoice created");
    assert_eq!(logs[0].data["orderId"], 42);
}

#[test]
fn handler_failure_without_requeue_uid() {
    let wiring = Wiring::new();
    let handle = consume(wiring.consumer(Recorder::default(), options()), &wiring.broker).unwrap();

    wiring.broker.push(QUEUE_NAME, r#"{"orderId":42,"fail":true}"#);

    assert!(eventually(|| !wiring.logger.at(Level::Error).is_empty()));
    let stats = handle.stop();

    assert_eq!(stats.nacked, 1);
    assert_eq!(wiring.broker.nacked().len(), 1);
    assert!(!wiring.broker.nacked()[0].1, "default must not requeue");
    assert_eq!(wiring.broker.ready(QUEUE_NAME), 0);

    let errors = wiring.broker.exchange_messages(ERROR_EXCHANGE);
    assert_eq!(errors.len(), 1);
    let uid = errors[0]["requeueUid"].as_str().unwrap();
    assert!(Uuid::parse_str(uid).is_ok());
    assert_eq!(errors[0]["error"]["message"], "bad input");
    assert_eq!(errors[0]["error"]["errors"][0], "Internal server error");
    assert_eq!(errors[0]["data"]["orderId"], 42);

    assert_eq!(wiring.logger.at(Level::Error).len(), 1);
    assert!(wiring.broker.exchange_messages(SUCCESS_EXCHANGE).is_empty());
}

#[test]
fn batch_is_processed_item_by_item() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring.broker.push(QUEUE_NAME, r#"[{"a":1},{"b":2}]"#);

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    let seen = recorder.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].get("a"), Some(&serde_json::json!(1)));
    assert_eq!(seen[1].get("b"), Some(&serde_json::json!(2)));
    assert_eq!(wiring.logger.at(Level::Info).len(), 2);
}

#[test]
fn own_origin_is_acked_and_ignored() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring.broker.push(
        QUEUE_NAME,
        r#"{"orderId":42,"requeueUid":"r1","messageOrigin":"billing"}"#,
    );

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    assert!(recorder.seen().is_empty());
    assert!(wiring.broker.exchange_messages(SUCCESS_EXCHANGE).is_empty());
    assert!(wiring.broker.exchange_messages(ERROR_EXCHANGE).is_empty());
    assert!(wiring.publisher_logger.entries().is_empty());
}
