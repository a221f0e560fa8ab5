//! Sender trait for point-to-point messaging.

use super::Message;
use crate::error::TransportError;

/// Trait for sending messages to a named queue (point-to-point).
///
/// Each message sent is stored by the broker and handed to exactly one
/// listener on that queue (competing consumers); it is never broadcast.
/// Implementations must bound their wait and report a stalled broker as
/// [`TransportError::Timeout`], never as success.
pub trait Sender: Send + Sync {
    /// Send a message to a named queue.
    fn send(&self, queue: &str, message: Message) -> Result<(), TransportError>;
}

impl<S: Sender + ?Sized> Sender for std::sync::Arc<S> {
    fn send(&self, queue: &str, message: Message) -> Result<(), TransportError> {
        (**self).send(queue, message)
    }
}
