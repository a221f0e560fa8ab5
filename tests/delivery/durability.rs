//! Persistent messages survive a broker restart; non-persistent ones do not.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use msgrelay::bus::{InMemoryBroker, Listener, ManualClock};
use msgrelay::config::ProducerSettings;
use msgrelay::consumer::Consumer;
use msgrelay::producer::Producer;
use msgrelay::redelivery::{DeliveryOutcome, RedeliveryPolicy};

use crate::support::{failing_times, manual_broker, order, orders_pair, Order, ORDERS, ORDERS_DLQ};

const POLL: Duration = Duration::from_millis(5);

#[test]
fn persistent_message_survives_restart() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let id = Producer::new(broker.clone()).publish(ORDERS, &order("o-1")).unwrap();

    broker.restart().unwrap();

    let consumer = Consumer::new(
        broker.clone(),
        orders_pair(),
        failing_times(0, Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);
    assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));
    assert_eq!(broker.acknowledged(), vec![id]);
}

#[test]
fn non_persistent_message_is_lost_on_restart() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let producer = Producer::new(broker.clone());
    producer.publish_with(ORDERS, &order("volatile"), false).unwrap();
    let kept = producer.publish(ORDERS, &order("durable")).unwrap();

    broker.restart().unwrap();

    let ids: Vec<_> = broker.messages(ORDERS).into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![kept]);
}

#[test]
fn producer_settings_control_durability() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let producer = Producer::with_settings(
        broker.clone(),
        ProducerSettings {
            persistent: false,
            ..ProducerSettings::default()
        },
    );
    producer.publish(ORDERS, &order("o-2")).unwrap();

    broker.restart().unwrap();
    assert_eq!(broker.depth(ORDERS), 0);
}

#[test]
fn in_flight_message_is_redelivered_after_restart() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::default());
    let id = Producer::new(broker.clone()).publish(ORDERS, &order("o-3")).unwrap();

    let delivery = broker.listen(ORDERS, 10).unwrap().unwrap();
    assert_eq!(delivery.attempt, 1);

    broker.restart().unwrap();

    // The old delivery tag is void
    assert!(broker.ack(&delivery).is_err());

    let redelivered = broker.listen(ORDERS, 10).unwrap().unwrap();
    assert_eq!(redelivered.message.id, id);
    assert_eq!(redelivered.attempt, 2);
    assert!(redelivered.is_redelivery());
    assert_eq!(redelivered.message.decode::<Order>().unwrap(), order("o-3"));
}

#[test]
fn scheduled_redelivery_is_ready_after_restart() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::new(2, Duration::from_secs(3600)));
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(broker.clone(), orders_pair(), failing_times(1, calls.clone()))
        .with_receive_timeout(POLL);

    Producer::new(broker.clone()).publish(ORDERS, &order("o-4")).unwrap();
    assert!(matches!(
        consumer.poll_once().unwrap(),
        Some(DeliveryOutcome::Redeliver { .. })
    ));
    assert_eq!(consumer.poll_once().unwrap(), None);

    broker.restart().unwrap();

    assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn journal_restores_a_fresh_broker_including_dead_letters() {
    let (broker, _clock) = manual_broker(RedeliveryPolicy::new(0, Duration::ZERO));
    let producer = Producer::new(broker.clone());
    let doomed = producer.publish(ORDERS, &order("doomed")).unwrap();
    producer.publish(ORDERS, &order("pending")).unwrap();

    // Fail the first delivery straight into the DLQ
    let consumer = Consumer::new(
        broker.clone(),
        orders_pair(),
        failing_times(1, Arc::new(AtomicUsize::new(0))),
    )
    .with_receive_timeout(POLL);
    assert!(matches!(
        consumer.poll_once().unwrap(),
        Some(DeliveryOutcome::DeadLettered { .. })
    ));

    let journal = broker.journal().unwrap();
    let restored = InMemoryBroker::from_journal(
        RedeliveryPolicy::new(0, Duration::ZERO),
        ManualClock::new(),
        &journal,
    )
    .unwrap();

    assert_eq!(restored.depth(ORDERS), 1);
    let dlq = restored.messages(ORDERS_DLQ);
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id, doomed);
    assert_eq!(dlq[0].decode::<Order>().unwrap(), order("doomed"));
}
