//! Listener trait for point-to-point messaging with explicit acknowledgment.

use super::Message;
use crate::error::TransportError;
use crate::redelivery::{DeliveryOutcome, RedeliveryPolicy};

/// One presentation of a message to a listener.
///
/// `attempt` is the broker-owned delivery counter: 1 on first delivery,
/// incremented exactly once per redelivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned handle used to settle this delivery
    pub tag: u64,
    /// Queue the message was taken from
    pub destination: String,
    pub attempt: u32,
    pub message: Message,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Trait for listening on a named queue (point-to-point).
///
/// Unlike a fan-out subscription, a `Listener` competes with other
/// listeners on the same queue: each message is delivered to exactly one
/// listener, and stays owned by the broker until it is acknowledged.
pub trait Listener: Send + Sync {
    /// Listen for the next message on a named queue, blocking until one
    /// is available or the timeout expires.
    fn listen(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, TransportError>;

    /// Confirm the delivery was processed; the broker removes the message.
    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Hand the delivery back unprocessed. The broker applies its
    /// redelivery policy and reports what it decided.
    fn nack(&self, delivery: &Delivery, reason: &str) -> Result<DeliveryOutcome, TransportError>;

    /// The redelivery policy the broker applies, when the client knows it.
    fn redelivery_policy(&self) -> Option<RedeliveryPolicy> {
        None
    }
}

impl<L: Listener + ?Sized> Listener for std::sync::Arc<L> {
    fn listen(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, TransportError> {
        (**self).listen(queue, timeout_ms)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        (**self).ack(delivery)
    }

    fn nack(&self, delivery: &Delivery, reason: &str) -> Result<DeliveryOutcome, TransportError> {
        (**self).nack(delivery, reason)
    }

    fn redelivery_policy(&self) -> Option<RedeliveryPolicy> {
        (**self).redelivery_policy()
    }
}
