use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::bus::headers::{DELIVERY_ATTEMPTS, FAILURE_REASON, ORIGINAL_DESTINATION};
use crate::bus::{Delivery, Message, Payload};

/// A dead-lettered payload, decoded as far as possible.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetter<T> {
    /// The payload decoded as the expected type.
    Typed(T),
    /// The payload is present but does not decode as the expected type.
    Raw(Vec<u8>),
    /// The message carried no payload.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadLetterKind {
    Typed,
    Raw,
    Empty,
}

impl DeadLetterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterKind::Typed => "typed",
            DeadLetterKind::Raw => "raw",
            DeadLetterKind::Empty => "empty",
        }
    }
}

impl fmt::Display for DeadLetterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T: Payload> DeadLetter<T> {
    pub fn classify(message: &Message) -> Self {
        if message.is_empty() {
            return DeadLetter::Empty;
        }
        match message.decode::<T>() {
            Ok(payload) => DeadLetter::Typed(payload),
            Err(_) => DeadLetter::Raw(message.payload.clone()),
        }
    }
}

impl<T> DeadLetter<T> {
    pub fn kind(&self) -> DeadLetterKind {
        match self {
            DeadLetter::Typed(_) => DeadLetterKind::Typed,
            DeadLetter::Raw(_) => DeadLetterKind::Raw,
            DeadLetter::Empty => DeadLetterKind::Empty,
        }
    }

    pub fn typed(&self) -> Option<&T> {
        match self {
            DeadLetter::Typed(payload) => Some(payload),
            _ => None,
        }
    }

    /// Printable form of a raw payload: the text if it is UTF-8, base64
    /// otherwise.
    pub fn raw_text(&self) -> Option<String> {
        match self {
            DeadLetter::Raw(bytes) => Some(match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => format!("base64:{}", STANDARD.encode(bytes)),
            }),
            _ => None,
        }
    }
}

/// Where a dead letter came from and why it ended up here.
///
/// Fields other than `dlq` and `message_id` are read from broker headers
/// and may be missing when the message was published to the DLQ directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterContext {
    pub dlq: String,
    pub message_id: String,
    pub message_type: Option<String>,
    pub original_destination: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts: Option<u32>,
}

impl DeadLetterContext {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        let message = &delivery.message;
        Self {
            dlq: delivery.destination.clone(),
            message_id: message.id.clone(),
            message_type: message.message_type.clone(),
            original_destination: message.header(ORIGINAL_DESTINATION).map(str::to_string),
            failure_reason: message.header(FAILURE_REASON).map(str::to_string),
            attempts: message
                .header(DELIVERY_ATTEMPTS)
                .and_then(|attempts| attempts.parse().ok()),
        }
    }
}
