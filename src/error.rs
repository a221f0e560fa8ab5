use std::time::Duration;

use thiserror::Error;

use crate::bus::CodecError;

/// Errors raised while talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The broker did not answer within the bounded wait.
    #[error("broker did not respond within {0:?}")]
    Timeout(Duration),
    /// The named queue does not exist on the broker.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    /// The delivery tag is not in flight (already settled, or lost in a restart).
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),
    /// The connection was closed by the application.
    #[error("connection closed")]
    Closed,
    /// The broker refused the operation.
    #[error("rejected by broker: {0}")]
    Rejected(String),
}

/// Errors surfaced to whoever drives the producer or a consumer slot.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("failed to send message to destination: {destination}")]
    MessageSendFailure {
        destination: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to encode message for destination: {destination}")]
    Encode {
        destination: String,
        #[source]
        source: CodecError,
    },

    #[error("failed to receive from destination: {destination}")]
    Receive {
        destination: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to acknowledge message {message_id} on {destination}")]
    Acknowledge {
        destination: String,
        message_id: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to hand message {message_id} back to {destination}")]
    Reject {
        destination: String,
        message_id: String,
        #[source]
        source: TransportError,
    },
}

impl QueueError {
    /// Map a transport error raised while publishing.
    pub(crate) fn from_send(destination: &str, source: TransportError) -> Self {
        match source {
            TransportError::UnknownQueue(name) => QueueError::QueueNotFound(name),
            source => QueueError::MessageSendFailure {
                destination: destination.to_string(),
                source,
            },
        }
    }

    /// HTTP-style status an outer layer should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            QueueError::QueueNotFound(_) => 404,
            QueueError::MessageSendFailure { .. } => 503,
            _ => 500,
        }
    }

    /// The destination the failed operation targeted.
    pub fn destination(&self) -> &str {
        match self {
            QueueError::QueueNotFound(name) => name,
            QueueError::MessageSendFailure { destination, .. }
            | QueueError::Encode { destination, .. }
            | QueueError::Receive { destination, .. }
            | QueueError::Acknowledge { destination, .. }
            | QueueError::Reject { destination, .. } => destination,
        }
    }
}
