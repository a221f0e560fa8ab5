use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{DeadLetter, DeadLetterContext, DeadLetterKind, DlqSink};
use crate::bus::{Listener, Payload, QueuePair};
use crate::config::ListenerSettings;
use crate::consumer::{panic_message, spawn_slots, ListenerHandle, SlotStats};
use crate::error::QueueError;

/// Statistics from a running dead-letter listener.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DlqStats {
    pub received: usize,
    pub typed: usize,
    pub raw: usize,
    pub empty: usize,
    pub errors: usize,
    pub polls: usize,
}

impl DlqStats {
    fn record(&mut self, result: &Result<Option<DeadLetterKind>, QueueError>) {
        match result {
            Ok(Some(kind)) => {
                self.received += 1;
                match kind {
                    DeadLetterKind::Typed => self.typed += 1,
                    DeadLetterKind::Raw => self.raw += 1,
                    DeadLetterKind::Empty => self.empty += 1,
                }
            }
            Ok(None) => {}
            Err(_) => self.errors += 1,
        }
    }
}

impl SlotStats for DlqStats {
    fn merge(&mut self, other: Self) {
        self.received += other.received;
        self.typed += other.typed;
        self.raw += other.raw;
        self.empty += other.empty;
        self.errors += other.errors;
        self.polls += other.polls;
    }
}

pub type DlqHandle = ListenerHandle<DlqStats>;

/// Drains a dead-letter queue into a [`DlqSink`].
pub struct DlqListener<T, L, S> {
    listener: L,
    dlq: String,
    sink: S,
    receive_timeout: Duration,
    _payload: PhantomData<fn() -> T>,
}

impl<T, L, S> DlqListener<T, L, S>
where
    T: Payload,
    L: Listener,
    S: DlqSink<T>,
{
    /// Listen on the dead-letter queue of `pair`.
    pub fn new(listener: L, pair: &QueuePair, sink: S) -> Self {
        Self::for_queue(listener, pair.dlq(), sink)
    }

    pub fn for_queue(listener: L, dlq: impl Into<String>, sink: S) -> Self {
        Self {
            listener,
            dlq: dlq.into(),
            sink,
            receive_timeout: ListenerSettings::default().receive_timeout(),
            _payload: PhantomData,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn dlq(&self) -> &str {
        &self.dlq
    }

    /// Take one dead letter, hand it to the sink and acknowledge it.
    ///
    /// The message is acknowledged even if the sink panics.
    pub fn poll_once(&self) -> Result<Option<DeadLetterKind>, QueueError> {
        let timeout_ms = self.receive_timeout.as_millis().min(u64::MAX as u128) as u64;
        let delivery = self
            .listener
            .listen(&self.dlq, timeout_ms)
            .map_err(|source| QueueError::Receive {
                destination: self.dlq.clone(),
                source,
            })?;
        let Some(delivery) = delivery else {
            return Ok(None);
        };

        let ctx = DeadLetterContext::from_delivery(&delivery);
        let letter = DeadLetter::<T>::classify(&delivery.message);
        let kind = letter.kind();

        if let Err(panic) =
            panic::catch_unwind(AssertUnwindSafe(|| self.sink.on_dead_lettered(letter, &ctx)))
        {
            tracing::error!(
                dlq = %ctx.dlq,
                message_id = %ctx.message_id,
                panic = %panic_message(panic.as_ref()),
                "dead-letter sink panicked"
            );
        }

        self.listener
            .ack(&delivery)
            .map_err(|source| QueueError::Acknowledge {
                destination: ctx.dlq.clone(),
                message_id: ctx.message_id.clone(),
                source,
            })?;

        Ok(Some(kind))
    }
}

impl<T, L, S> DlqListener<T, L, S>
where
    T: Payload + 'static,
    L: Listener + 'static,
    S: DlqSink<T> + 'static,
{
    /// Drain the dead-letter queue on a background thread.
    pub fn spawn(self) -> DlqHandle {
        let backoff = self.receive_timeout.max(Duration::from_millis(1));
        let listener = Arc::new(self);
        tracing::info!(dlq = listener.dlq(), "dead-letter listener started");

        spawn_slots(1, move |stats: &mut DlqStats| {
            stats.polls += 1;
            let result = listener.poll_once();
            stats.record(&result);
            if let Err(err) = result {
                tracing::warn!(error = %err, "dead-letter poll failed");
                if matches!(err, QueueError::Receive { .. }) {
                    thread::sleep(backoff);
                }
            }
        })
    }
}
