//! Background consumers and dead-letter listeners on real threads.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msgrelay::bus::{DestinationResolver, InMemoryBroker};
use msgrelay::config::MessagingConfig;
use msgrelay::consumer::{Ack, Consumer, DeliveryContext, HandlerResult};
use msgrelay::dlq::{DlqListener, LoggingDlqSink};
use msgrelay::logging;
use msgrelay::producer::Producer;

use crate::support::{always_failing, failing_times, order, wait_until, Order, ORDERS, ORDERS_DLQ};

const CONFIG: &str = r#"
[redelivery]
max_redeliveries = 2
initial_delay_ms = 10
redelivery_delay_ms = 10

[listener]
concurrency = 3
receive_timeout_ms = 10
"#;

fn setup() -> (MessagingConfig, InMemoryBroker) {
    logging::init_for_tests();
    let config = MessagingConfig::from_toml_str(CONFIG).unwrap();
    let broker = InMemoryBroker::new(config.redelivery_policy()).with_queue(ORDERS);
    (config, broker)
}

#[test]
fn concurrent_slots_process_every_message_once() {
    let (config, broker) = setup();
    let resolver = DestinationResolver::for_policy(&config.redelivery_policy()).register(ORDERS);
    let pair = resolver.resolve(ORDERS).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let handle = Consumer::new(broker.clone(), pair, move |order: Order, _: &DeliveryContext| -> HandlerResult {
        log.lock().unwrap().push(order.order_id);
        Ok(Ack)
    })
    .with_policy(&config.redelivery_policy())
    .with_settings(&config.listener)
    .spawn();
    assert_eq!(handle.slots(), 3);

    let producer = Producer::with_settings(broker.clone(), config.producer.clone()).with_resolver(resolver);
    for i in 0..20 {
        producer.publish(ORDERS, &order(&format!("o-{}", i))).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || broker.acknowledged().len() == 20));
    let stats = handle.stop();

    assert_eq!(stats.acknowledged, 20);
    assert_eq!(stats.redelivered, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.polls >= 20);

    let seen = seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[test]
fn spawned_consumer_recovers_from_transient_failures() {
    let (config, broker) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = Consumer::new(broker.clone(), crate::support::orders_pair(), failing_times(2, calls.clone()))
        .with_settings(&config.listener)
        .spawn();

    Producer::new(broker.clone()).publish(ORDERS, &order("o-1")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || broker.acknowledged().len() == 1));
    let stats = handle.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.redelivered, 2);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[test]
fn poison_message_flows_to_dlq_listener() {
    let (config, broker) = setup();
    let consumer = Consumer::new(
        broker.clone(),
        crate::support::orders_pair(),
        always_failing(Arc::new(AtomicUsize::new(0))),
    )
    .with_settings(&config.listener)
    .spawn();

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let dlq = DlqListener::<Order, _, _>::new(
        broker.clone(),
        &crate::support::orders_pair(),
        LoggingDlqSink::with_buffer(buffer.clone()),
    )
    .with_receive_timeout(config.listener.receive_timeout())
    .spawn();

    let id = Producer::new(broker.clone()).publish(ORDERS, &order("poison")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || buffer.lock().unwrap().len() == 1));
    let consumer_stats = consumer.stop();
    let dlq_stats = dlq.stop();

    assert_eq!(consumer_stats.redelivered, 2);
    assert_eq!(consumer_stats.dead_lettered, 1);
    assert_eq!(dlq_stats.received, 1);
    assert_eq!(dlq_stats.typed, 1);
    assert_eq!(broker.deliveries_of(&id).len(), 4);
    assert_eq!(broker.depth(ORDERS_DLQ), 0);
    assert!(buffer.lock().unwrap()[0].contains("poison"));
}

#[test]
fn dropping_the_handle_stops_the_slots() {
    let (config, broker) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = Consumer::new(broker.clone(), crate::support::orders_pair(), failing_times(0, calls.clone()))
        .with_settings(&config.listener)
        .spawn();
    assert!(handle.is_running());

    drop(handle);
    std::thread::sleep(Duration::from_millis(100));

    Producer::new(broker.clone()).publish(ORDERS, &order("late")).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker.depth(ORDERS), 1);
}
