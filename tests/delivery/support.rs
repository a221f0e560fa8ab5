//! Shared fixtures: an order payload, a broker on a manual clock and
//! handlers that fail on demand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use msgrelay::bus::{InMemoryBroker, ManualClock, Payload, QueuePair};
use msgrelay::consumer::{Ack, DeliveryContext, HandlerResult, Retry};
use msgrelay::redelivery::RedeliveryPolicy;
use serde::{Deserialize, Serialize};

pub const ORDERS: &str = "orders";
pub const ORDERS_DLQ: &str = "orders.DLQ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub customer_name: String,
    pub product: String,
    pub quantity: u32,
    pub price: f64,
}

impl Payload for Order {
    const TYPE: &'static str = "order";
}

pub fn order(id: &str) -> Order {
    Order {
        order_id: id.to_string(),
        customer_name: "Ada Lovelace".to_string(),
        product: "Analytical Engine".to_string(),
        quantity: 1,
        price: 1843.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub order_id: String,
}

impl Payload for Refund {
    const TYPE: &'static str = "refund";
}

pub fn orders_pair() -> QueuePair {
    QueuePair::new(ORDERS, ".DLQ")
}

/// Broker on a manual clock with the `orders` queue declared.
pub fn manual_broker(policy: RedeliveryPolicy) -> (InMemoryBroker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let broker = InMemoryBroker::with_clock(policy, clock.clone()).with_queue(ORDERS);
    (broker, clock)
}

/// Handler that fails its first `failures` invocations, counting every call.
pub fn failing_times(
    failures: usize,
    calls: Arc<AtomicUsize>,
) -> impl Fn(Order, &DeliveryContext) -> HandlerResult + Send + Sync {
    move |_order, _ctx| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(Retry::new(format!("transient failure {}", call)))
        } else {
            Ok(Ack)
        }
    }
}

/// Handler that always fails.
pub fn always_failing(calls: Arc<AtomicUsize>) -> impl Fn(Order, &DeliveryContext) -> HandlerResult + Send + Sync {
    failing_times(usize::MAX, calls)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
