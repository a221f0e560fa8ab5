use std::fmt;

use crate::bus::Delivery;

/// Successful processing; the delivery will be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Failed processing; the delivery goes back to the broker.
///
/// Any `std::error::Error` converts into `Retry`, so handlers can use `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retry {
    reason: String,
}

impl Retry {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn into_reason(self) -> String {
        self.reason
    }
}

impl fmt::Display for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl<E: std::error::Error> From<E> for Retry {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

pub type HandlerResult = Result<Ack, Retry>;

/// What a handler knows about the delivery it is processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub destination: String,
    pub message_id: String,
    pub message_type: Option<String>,
    /// 1-based delivery attempt, as counted by the broker
    pub attempt: u32,
    /// Attempts the redelivery policy allows before dead-lettering
    pub max_attempts: u32,
    pub headers: Vec<(String, String)>,
}

impl DeliveryContext {
    pub fn new(delivery: &Delivery, max_attempts: u32) -> Self {
        Self {
            destination: delivery.destination.clone(),
            message_id: delivery.message.id.clone(),
            message_type: delivery.message.message_type.clone(),
            attempt: delivery.attempt,
            max_attempts,
            headers: delivery.message.headers.clone(),
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// `true` if a failure now sends the message to the dead-letter queue.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Processes one decoded payload.
///
/// Implemented for any `Fn(T, &DeliveryContext) -> HandlerResult`.
pub trait MessageHandler<T>: Send + Sync {
    fn handle(&self, payload: T, ctx: &DeliveryContext) -> HandlerResult;
}

impl<T, F> MessageHandler<T> for F
where
    F: Fn(T, &DeliveryContext) -> HandlerResult + Send + Sync,
{
    fn handle(&self, payload: T, ctx: &DeliveryContext) -> HandlerResult {
        self(payload, ctx)
    }
}
