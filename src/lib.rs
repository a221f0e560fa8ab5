pub mod bus;
pub mod config;
pub mod consumer;
pub mod dlq;
mod error;
pub mod logging;
pub mod producer;
pub mod redelivery;

pub use bus::{
    Broker, BrokerClient, Connection, Delivery, DestinationResolver, InMemoryBroker, Listener, Message,
    Payload, QueuePair, Sender, WireFormat,
};
pub use config::{ConfigError, MessagingConfig};
pub use consumer::{
    Ack, Consumer, ConsumerHandle, ConsumerStats, DeliveryContext, FailureHandler,
    HandlerResult, LoggingFailureHandler, MessageHandler, ProcessingFailure, Retry,
};
pub use dlq::{DeadLetter, DeadLetterContext, DlqHandle, DlqListener, DlqSink, LoggingDlqSink};
pub use error::{QueueError, TransportError};
pub use producer::Producer;
pub use redelivery::{DeliveryOutcome, RedeliveryPolicy};

// Re-export the EventEmitter used by the dead-letter alert sink
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
