//! Terminal handling for dead-lettered messages.
//!
//! When the broker gives up on a message it moves it to the destination's
//! dead-letter queue. A [`DlqListener`] drains that queue and hands every
//! message to a [`DlqSink`] for alerting or inspection. The listener always
//! acknowledges: nothing here sends a message back to its origin.
//!
//! Dead-lettered payloads may not match the expected type, so the sink
//! receives a [`DeadLetter`] that is typed, raw bytes or empty.

mod letter;
mod listener;
mod sink;

pub use letter::{DeadLetter, DeadLetterContext, DeadLetterKind};
pub use listener::{DlqHandle, DlqListener, DlqStats};
#[cfg(feature = "emitter")]
pub use sink::{DeadLetterAlert, EmitterDlqSink, DEAD_LETTERED_EVENT};
pub use sink::{DlqSink, LoggingDlqSink};
