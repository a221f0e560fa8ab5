//! Publishing domain messages to a named destination.

use crate::bus::{DestinationResolver, Message, Payload, Sender, WireFormat};
use crate::config::ProducerSettings;
use crate::error::QueueError;

/// Serializes domain messages and enqueues them on the broker.
///
/// Holds no state beyond its settings; clones of the sender (or a shared
/// [`Connection`](crate::bus::Connection)) can publish concurrently.
///
/// ## Example
///
/// ```
/// use msgrelay::bus::{InMemoryBroker, Payload};
/// use msgrelay::producer::Producer;
/// use msgrelay::redelivery::RedeliveryPolicy;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Order {
///     order_id: String,
/// }
///
/// impl Payload for Order {
///     const TYPE: &'static str = "order";
/// }
///
/// let broker = InMemoryBroker::new(RedeliveryPolicy::default()).with_queue("orders");
/// let producer = Producer::new(broker.clone());
///
/// producer.publish("orders", &Order { order_id: "o-1".into() }).unwrap();
/// assert_eq!(broker.depth("orders"), 1);
/// ```
pub struct Producer<S> {
    sender: S,
    resolver: Option<DestinationResolver>,
    settings: ProducerSettings,
}

impl<S: Sender> Producer<S> {
    pub fn new(sender: S) -> Self {
        Self::with_settings(sender, ProducerSettings::default())
    }

    pub fn with_settings(sender: S, settings: ProducerSettings) -> Self {
        Self {
            sender,
            resolver: None,
            settings,
        }
    }

    /// Refuse destinations `resolver` does not know, before touching the broker.
    pub fn with_resolver(mut self, resolver: DestinationResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Publish `payload` to `destination` with the configured durability.
    ///
    /// Returns the id of the enqueued message.
    pub fn publish<T: Payload>(&self, destination: &str, payload: &T) -> Result<String, QueueError> {
        self.publish_with(destination, payload, self.settings.persistent)
    }

    /// Publish `payload` to `destination`, choosing durability explicitly.
    pub fn publish_with<T: Payload>(
        &self,
        destination: &str,
        payload: &T,
        persistent: bool,
    ) -> Result<String, QueueError> {
        let message = Message::encode(payload, self.settings.format)
            .map_err(|source| QueueError::Encode {
                destination: destination.to_string(),
                source,
            })?
            .with_persistence(persistent);

        let id = message.id.clone();
        self.send(destination, message)?;
        Ok(id)
    }

    /// Publish a plain text message, as-is.
    pub fn publish_text(&self, destination: &str, text: &str) -> Result<String, QueueError> {
        let message = Message::raw(text).with_persistence(self.settings.persistent);
        let id = message.id.clone();
        self.send(destination, message)?;
        Ok(id)
    }

    /// Enqueue an already-built message.
    pub fn send(&self, destination: &str, message: Message) -> Result<(), QueueError> {
        self.check_destination(destination)?;

        tracing::info!(
            destination,
            message_id = %message.id,
            message_type = message.message_type.as_deref().unwrap_or("<raw>"),
            persistent = message.persistent,
            "sending message"
        );

        self.sender.send(destination, message).map_err(|source| {
            tracing::error!(destination, error = %source, "failed to send message");
            QueueError::from_send(destination, source)
        })
    }

    pub fn format(&self) -> WireFormat {
        self.settings.format
    }

    fn check_destination(&self, destination: &str) -> Result<(), QueueError> {
        if destination.is_empty() {
            return Err(QueueError::QueueNotFound(String::new()));
        }
        match &self.resolver {
            Some(resolver) if !resolver.contains(destination) => {
                tracing::warn!(destination, "publish to unknown destination refused");
                Err(QueueError::QueueNotFound(destination.to_string()))
            }
            _ => Ok(()),
        }
    }
}
