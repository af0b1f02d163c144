//! Publisher to consumer over a fanout exchange.

use std::sync::Arc;

use fanout_adapter::{
    consume, BrokerPublisher, BufferLogger, HandlerError, MessagePublisher, Record, SendMessage,
    ServiceIdentity,
};

use crate::support::{eventually, options, Recorder, Wiring, EXCHANGE, QUEUE_NAME};

fn upstream(wiring: &Wiring, service: &str) -> BrokerPublisher<fanout_adapter::broker::InMemoryBroker> {
    BrokerPublisher::new(
        wiring.broker.clone(),
        ServiceIdentity::new(service),
        Arc::new(BufferLogger::new()),
    )
}

#[test]
fn business_fields_survive_the_trip() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    let record = Record::new()
        .with_field("orderId", 42)
        .with_field("lines", serde_json::json!([{ "sku": "A-1", "qty": 2 }]));
    upstream(&wiring, "orders")
        .send_message(SendMessage::to_exchange(EXCHANGE, record.clone()))
        .unwrap();

    assert!(eventually(|| recorder.seen().len() == 1));
    handle.stop();

    let received = &recorder.seen()[0];
    assert_eq!(received.fields, record.fields);
    assert_eq!(received.message_origin.as_deref(), Some("orders"));
    assert!(received.habitar_process_uid.is_some());
    assert_eq!(received.requeue_uid, None);
}

#[test]
fn fanout_echo_of_own_publish_is_skipped() {
    let wiring = Wiring::new();
    let recorder = Recorder::default();
    let handle = consume(wiring.consumer(recorder.clone(), options()), &wiring.broker).unwrap();

    wiring
        .publisher
        .send_message(SendMessage::to_exchange(EXCHANGE, Record::new().with_field("n", 1)))
        .unwrap();

    assert!(eventually(|| wiring.broker.acked().len() == 1));
    let stats = handle.stop();

    assert_eq!(stats.acked, 1);
    assert!(recorder.seen().is_empty());
    assert_eq!(wiring.broker.ready(QUEUE_NAME), 0);
}

#[test]
fn lineage_is_preserved_across_hops() {
    let wiring = Wiring::new();
    let forwarder = wiring.publisher.clone();
    let handler = move |record: &Record| -> Result<(), HandlerError> {
        forwarder
            .send_message(SendMessage::to_exchange("invoices.created", record.clone()))
            .map_err(HandlerError::other)
    };
    let handle = consume(wiring.consumer(handler, options()), &wiring.broker).unwrap();

    let origin = Record::new().with_field("orderId", 7).with_process_uid("lineage-1");
    upstream(&wiring, "orders")
        .send_message(SendMessage::to_exchange(EXCHANGE, origin))
        .unwrap();

    assert!(eventually(|| wiring.broker.exchange_messages("invoices.created").len() == 1));
    handle.stop();

    let forwarded = &wiring.broker.exchange_messages("invoices.created")[0];
    assert_eq!(forwarded["habitarProcessUid"], "lineage-1");
    assert_eq!(forwarded["messageOrigin"], "billing");
    assert_eq!(forwarded["orderId"], 7);
}
