//! Consuming messages under explicit acknowledgment.
//!
//! A [`Consumer`] takes one delivery at a time from its destination, decodes
//! it, and runs the [`MessageHandler`]. The handler's result decides the
//! settlement:
//!
//! - `Ok(Ack)`: the delivery is acknowledged and leaves the queue.
//! - `Err(Retry)`, a decode failure or a panic: the [`FailureHandler`]
//!   is told, then the delivery is rejected so the broker redelivers it or
//!   dead-letters it per its redelivery policy.
//!
//! A failed delivery is never acknowledged. Handlers see at-least-once
//! delivery and must tolerate running more than once for the same message.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use msgrelay::bus::{InMemoryBroker, Payload, QueuePair};
//! use msgrelay::consumer::{Ack, Consumer, DeliveryContext, HandlerResult, Retry};
//! use msgrelay::producer::Producer;
//! use msgrelay::redelivery::{DeliveryOutcome, RedeliveryPolicy};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Order {
//!     quantity: u32,
//! }
//!
//! impl Payload for Order {
//!     const TYPE: &'static str = "order";
//! }
//!
//! let broker = InMemoryBroker::new(RedeliveryPolicy::new(2, Duration::ZERO)).with_queue("orders");
//! Producer::new(broker.clone()).publish("orders", &Order { quantity: 1 }).unwrap();
//!
//! let consumer = Consumer::new(
//!     broker.clone(),
//!     QueuePair::new("orders", ".DLQ"),
//!     |order: Order, _ctx: &DeliveryContext| -> HandlerResult {
//!         if order.quantity == 0 {
//!             return Err(Retry::new("empty order"));
//!         }
//!         Ok(Ack)
//!     },
//! );
//!
//! assert_eq!(consumer.poll_once().unwrap(), Some(DeliveryOutcome::Acknowledged));
//! ```

mod failure;
mod handler;
mod slot;
mod thread;

pub use failure::{FailureHandler, LoggingFailureHandler, ProcessingFailure};
pub use handler::{Ack, DeliveryContext, HandlerResult, MessageHandler, Retry};
pub use slot::Consumer;
pub use thread::{ConsumerHandle, ConsumerStats, ListenerHandle, SlotStats};

pub(crate) use thread::{panic_message, spawn_slots};
