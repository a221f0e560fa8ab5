use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use super::{DeadLetter, DeadLetterContext};

/// Receives dead-lettered messages.
///
/// Sinks are terminal: they return nothing and the message is acknowledged
/// once they are done. A sink that wants to retry must do so itself.
pub trait DlqSink<T>: Send + Sync {
    fn on_dead_lettered(&self, letter: DeadLetter<T>, ctx: &DeadLetterContext);
}

impl<T, F> DlqSink<T> for F
where
    F: Fn(DeadLetter<T>, &DeadLetterContext) + Send + Sync,
{
    fn on_dead_lettered(&self, letter: DeadLetter<T>, ctx: &DeadLetterContext) {
        self(letter, ctx)
    }
}

/// Logs every dead letter at error level.
///
/// With a buffer, the formatted line is also captured for inspection.
#[derive(Debug, Default, Clone)]
pub struct LoggingDlqSink {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LoggingDlqSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LoggingDlqSink {
            buffer: Some(buffer),
        }
    }
}

impl<T: Debug> DlqSink<T> for LoggingDlqSink {
    fn on_dead_lettered(&self, letter: DeadLetter<T>, ctx: &DeadLetterContext) {
        let origin = ctx.original_destination.as_deref().unwrap_or("<unknown>");
        let line = match &letter {
            DeadLetter::Typed(payload) => {
                format!("[DLQ] {} from {}: {:?}", ctx.message_id, origin, payload)
            }
            DeadLetter::Raw(_) => format!(
                "[DLQ] {} from {}: raw {}",
                ctx.message_id,
                origin,
                letter.raw_text().unwrap_or_default()
            ),
            DeadLetter::Empty => format!("[DLQ] {} from {}: empty message", ctx.message_id, origin),
        };

        tracing::error!(
            dlq = %ctx.dlq,
            message_id = %ctx.message_id,
            original_destination = origin,
            attempts = ?ctx.attempts,
            failure_reason = ?ctx.failure_reason,
            kind = %letter.kind(),
            "{}",
            line
        );

        if let Some(buffer) = &self.buffer {
            buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(line);
        }
    }
}

#[cfg(feature = "emitter")]
pub use emitter::{DeadLetterAlert, EmitterDlqSink, DEAD_LETTERED_EVENT};

#[cfg(feature = "emitter")]
mod emitter {
    use std::sync::Mutex;

    use event_emitter_rs::EventEmitter;
    use serde::{Deserialize, Serialize};

    use crate::dlq::{DeadLetter, DeadLetterContext};
    use super::DlqSink;

    /// Event name used for dead-letter alerts.
    pub const DEAD_LETTERED_EVENT: &str = "dead_lettered";

    /// JSON body of a dead-letter alert.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DeadLetterAlert {
        pub dlq: String,
        pub message_id: String,
        pub message_type: Option<String>,
        pub original_destination: Option<String>,
        pub failure_reason: Option<String>,
        pub attempts: Option<u32>,
        pub kind: String,
        pub payload: Option<String>,
    }

    impl DeadLetterAlert {
        pub fn new<T: Serialize>(letter: &DeadLetter<T>, ctx: &DeadLetterContext) -> Self {
            let payload = match letter {
                DeadLetter::Typed(payload) => serde_json::to_string(payload).ok(),
                DeadLetter::Raw(_) => letter.raw_text(),
                DeadLetter::Empty => None,
            };
            Self {
                dlq: ctx.dlq.clone(),
                message_id: ctx.message_id.clone(),
                message_type: ctx.message_type.clone(),
                original_destination: ctx.original_destination.clone(),
                failure_reason: ctx.failure_reason.clone(),
                attempts: ctx.attempts,
                kind: letter.kind().to_string(),
                payload,
            }
        }
    }

    /// Emits a [`DeadLetterAlert`] as a JSON string on an in-process
    /// [`EventEmitter`].
    pub struct EmitterDlqSink {
        emitter: Mutex<EventEmitter>,
    }

    impl EmitterDlqSink {
        pub fn new(emitter: EventEmitter) -> Self {
            EmitterDlqSink {
                emitter: Mutex::new(emitter),
            }
        }
    }

    impl<T: Serialize> DlqSink<T> for EmitterDlqSink {
        fn on_dead_lettered(&self, letter: DeadLetter<T>, ctx: &DeadLetterContext) {
            let alert = DeadLetterAlert::new(&letter, ctx);
            match serde_json::to_string(&alert) {
                Ok(json) => {
                    self.emitter
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .emit(DEAD_LETTERED_EVENT, json);
                }
                Err(err) => tracing::error!(
                    message_id = %ctx.message_id,
                    error = %err,
                    "could not encode dead-letter alert"
                ),
            }
        }
    }
}
