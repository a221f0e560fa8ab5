//! Broker abstraction - point-to-point queues with explicit acknowledgment.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  send()   ┌──────────────────────────┐  listen()  ┌──────────────┐
//! │   Producer   │ ────────▶ │     Broker (Sender +     │ ─────────▶ │   Consumer   │
//! └──────────────┘           │        Listener)         │ ◀───────── │   (slot)     │
//!                            │  redelivery policy, DLQ  │  ack/nack  └──────────────┘
//!                            └──────────────────────────┘
//!                                         │ <queue>.DLQ
//!                                         ▼
//!                                   ┌────────────┐
//!                                   │ DlqListener│
//!                                   └────────────┘
//! ```
//!
//! The application never counts attempts or moves messages between queues;
//! it only acknowledges or rejects deliveries. `InMemoryBroker` is the
//! included implementation; adapters for real brokers implement
//! [`Sender`] and [`Listener`].

mod clock;
mod connection;
mod destination;
mod in_memory_queue;
mod listener;
mod message;
mod sender;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{BrokerClient, Connection};
pub use destination::{DestinationResolver, QueuePair};
pub use in_memory_queue::{DeliveryRecord, InMemoryBroker};
pub use listener::{Delivery, Listener};
pub use message::{CodecError, Message, Payload, WireFormat, TYPE_FIELD};
pub use sender::Sender;

/// Headers the broker stamps on a dead-lettered message.
pub mod headers {
    /// Queue the message was dead-lettered from.
    pub const ORIGINAL_DESTINATION: &str = "x-original-destination";
    /// Reason given with the final rejection.
    pub const FAILURE_REASON: &str = "x-failure-reason";
    /// Number of delivery attempts made before dead-lettering.
    pub const DELIVERY_ATTEMPTS: &str = "x-delivery-attempts";
}

/// Combined trait for a broker client that can both send and listen.
pub trait Broker: Sender + Listener {}

// Blanket implementation
impl<T: Sender + Listener> Broker for T {}
