//! Explicit acknowledgment: success removes a message exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use msgrelay::bus::{Connection, Listener};
use msgrelay::config::BrokerSettings;
use msgrelay::consumer::Consumer;
use msgrelay::producer::Producer;
use msgrelay::redelivery::{DeliveryOutcome, RedeliveryPolicy};
use msgrelay::QueueError;

use crate::support::{failing_times, manual_broker, order, orders_pair, ORDERS, ORDERS_DLQ};

const POLL: Duration = Duration::from_millis(5);

#[test]
fn success_is_acknowledged_once_and_never_redelivered() {
    let (broker, clock) = manual_broker(RedeliveryPolicy::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(broker.clone(), orders_pair(), failing_times(0, calls.clone()))
        .with_receive_timeout(POLL);

    let id = Producer::new(broker.clone()).publish(ORDERS, &order("o-1")).unwrap();

    assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));

    clock.advance(Duration::from_secs(60));
    assert_eq!(consumer.poll_once().unwrap(), None);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.acknowledged(), vec![id.clone()]);
    assert_eq!(broker.deliveries_of(&id).len(), 1);
    assert_eq!(broker.depth(ORDERS), 0);
    assert_eq!(broker.depth(ORDERS_DLQ), 0);
}

#[test]
fn messages_are_consumed_in_publish_order() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let producer = Producer::new(broker.clone());
    let ids: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| producer.publish(ORDERS, &order(id)).unwrap())
        .collect();

    let consumer = Consumer::new(
        broker.clone(),
        orders_pair(),
        failing_times(0, Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);
    while consumer.poll_once().unwrap().is_some() {}

    assert_eq!(broker.acknowledged(), ids);
}

#[test]
fn lost_acknowledgment_leads_to_redelivery() {
    let (broker, clock) = manual_broker(RedeliveryPolicy::new(2, Duration::from_millis(500)));
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(broker.clone(), orders_pair(), failing_times(0, calls.clone()))
        .with_receive_timeout(POLL);

    let id = Producer::new(broker.clone()).publish(ORDERS, &order("o-2")).unwrap();
    broker.lose_next_acks(1);

    let err = consumer.poll_once().unwrap_err();
    assert!(matches!(err, QueueError::Acknowledge { .. }));
    assert!(broker.acknowledged().is_empty());

    clock.advance(Duration::from_millis(500));
    assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let attempts: Vec<_> = broker.deliveries_of(&id).iter().map(|d| d.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(broker.acknowledged(), vec![id]);
}

#[test]
fn stale_delivery_tag_cannot_be_acknowledged_twice() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    Producer::new(broker.clone()).publish(ORDERS, &order("o-3")).unwrap();

    let delivery = broker.listen(ORDERS, 10).unwrap().unwrap();
    broker.ack(&delivery).unwrap();
    assert!(broker.ack(&delivery).is_err());
    assert_eq!(broker.acknowledged().len(), 1);
}

#[test]
fn consumer_over_a_connection() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let connection = Connection::open(broker.clone(), &BrokerSettings::default());
    let consumer = Consumer::new(
        connection.clone(),
        orders_pair(),
        failing_times(0, Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);

    Producer::new(connection.clone()).publish(ORDERS, &order("o-4")).unwrap();
    assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));

    connection.close();
    let err = consumer.poll_once().unwrap_err();
    assert!(matches!(err, QueueError::Receive { .. }));
}
