//! Dead-lettered messages reach the sink as typed, raw or empty letters.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgrelay::bus::{Message, Sender, WireFormat};
use msgrelay::consumer::Consumer;
use msgrelay::dlq::{DeadLetter, DeadLetterContext, DeadLetterKind, DlqListener, LoggingDlqSink};
use msgrelay::producer::Producer;
use msgrelay::redelivery::{DeliveryOutcome, RedeliveryPolicy};

use crate::support::{
    always_failing, manual_broker, order, orders_pair, Order, Refund, ORDERS, ORDERS_DLQ,
};

const POLL: Duration = Duration::from_millis(5);

type Captured = Arc<Mutex<Vec<(DeadLetter<Order>, DeadLetterContext)>>>;

fn capturing_listener(
    broker: &msgrelay::InMemoryBroker,
) -> (
    DlqListener<Order, msgrelay::InMemoryBroker, impl msgrelay::dlq::DlqSink<Order>>,
    Captured,
) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let captured = captured.clone();
        move |letter: DeadLetter<Order>, ctx: &DeadLetterContext| {
            captured.lock().unwrap().push((letter, ctx.clone()));
        }
    };
    let listener = DlqListener::new(broker.clone(), &orders_pair(), sink).with_receive_timeout(POLL);
    (listener, captured)
}

#[test]
fn exhausted_message_reaches_sink_typed_with_origin() {
    let policy = RedeliveryPolicy::new(1, Duration::ZERO);
    let (broker, _clock) = manual_broker(policy.clone());
    let consumer = Consumer::new(
        broker.clone(),
        orders_pair(),
        always_failing(Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);

    let id = Producer::new(broker.clone()).publish(ORDERS, &order("o-1")).unwrap();
    while let Some(outcome) = consumer.poll_once().unwrap() {
        if outcome.is_terminal() {
            break;
        }
    }

    let (listener, captured) = capturing_listener(&broker);
    assert_eq!(listener.poll_once().unwrap(), Some(DeadLetterKind::Typed));

    let captured = captured.lock().unwrap();
    let (letter, ctx) = &captured[0];
    assert_eq!(letter, &DeadLetter::Typed(order("o-1")));
    assert_eq!(ctx.dlq, ORDERS_DLQ);
    assert_eq!(ctx.message_id, id);
    assert_eq!(ctx.original_destination.as_deref(), Some(ORDERS));
    assert_eq!(ctx.attempts, Some(2));
    assert_eq!(ctx.message_type.as_deref(), Some("order"));

    assert_eq!(broker.depth(ORDERS_DLQ), 0);
    assert_eq!(broker.acknowledged(), vec![id]);
}

#[test]
fn wrong_type_on_queue_is_dead_lettered_and_reported_raw() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::new(0, Duration::ZERO));
    let consumer = Consumer::new(
        broker.clone(),
        orders_pair(),
        always_failing(Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);

    Producer::new(broker.clone())
        .publish(ORDERS, &Refund { order_id: "o-9".into() })
        .unwrap();
    assert!(matches!(
        consumer.poll_once().unwrap(),
        Some(DeliveryOutcome::DeadLettered { .. })
    ));

    let (listener, captured) = capturing_listener(&broker);
    assert_eq!(listener.poll_once().unwrap(), Some(DeadLetterKind::Raw));

    let captured = captured.lock().unwrap();
    let (letter, ctx) = &captured[0];
    assert_eq!(letter.raw_text().as_deref(), Some(r#"{"order_id":"o-9"}"#));
    assert_eq!(ctx.message_type.as_deref(), Some("refund"));
    assert!(ctx
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("expected payload type order")));
}

#[test]
fn empty_and_binary_payloads_are_tolerated() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    broker.send(ORDERS_DLQ, Message::empty()).unwrap();
    broker
        .send(ORDERS_DLQ, Message::new(None, WireFormat::Binary, vec![0, 159, 146, 150]))
        .unwrap();

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let listener = DlqListener::<Order, _, _>::new(
        broker.clone(),
        &orders_pair(),
        LoggingDlqSink::with_buffer(buffer.clone()),
    )
    .with_receive_timeout(POLL);

    assert_eq!(listener.poll_once().unwrap(), Some(DeadLetterKind::Empty));
    assert_eq!(listener.poll_once().unwrap(), Some(DeadLetterKind::Raw));
    assert_eq!(listener.poll_once().unwrap(), None);

    let logs = buffer.lock().unwrap();
    assert!(logs[0].ends_with("empty message"));
    assert!(logs[1].ends_with("raw base64:AJ+Slg=="));
    assert_eq!(broker.acknowledged().len(), 2);
}

#[test]
fn dead_letter_queue_failures_never_cascade() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::new(0, Duration::ZERO));
    let dlq_consumer = Consumer::new(
        broker.clone(),
        msgrelay::bus::QueuePair::new(ORDERS_DLQ, ".DLQ"),
        always_failing(Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);

    broker
        .send(ORDERS_DLQ, Message::encode(&order("o-2"), WireFormat::Json).unwrap())
        .unwrap();

    assert!(matches!(
        dlq_consumer.poll_once().unwrap(),
        Some(DeliveryOutcome::Redeliver { next_attempt: 2, .. })
    ));
    assert_eq!(broker.depth(ORDERS_DLQ), 1);
    assert_eq!(broker.depth("orders.DLQ.DLQ"), 0);
}
