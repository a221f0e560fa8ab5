use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{
    panic_message, spawn_slots, Ack, ConsumerHandle, ConsumerStats, DeliveryContext,
    FailureHandler, LoggingFailureHandler, MessageHandler, ProcessingFailure,
};
use crate::bus::{Delivery, Listener, Payload, QueuePair};
use crate::config::ListenerSettings;
use crate::error::QueueError;
use crate::redelivery::{DeliveryOutcome, RedeliveryPolicy};

/// A typed listener on one destination.
///
/// `T` is the payload type, `L` the broker connection, `H` the handler and
/// `F` the failure handler.
pub struct Consumer<T, L, H, F = LoggingFailureHandler> {
    listener: L,
    pair: QueuePair,
    handler: H,
    failure_handler: F,
    max_attempts: u32,
    receive_timeout: Duration,
    concurrency: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T, L, H> Consumer<T, L, H>
where
    T: Payload,
    L: Listener,
    H: MessageHandler<T>,
{
    pub fn new(listener: L, pair: QueuePair, handler: H) -> Self {
        let settings = ListenerSettings::default();
        let max_attempts = listener.redelivery_policy().unwrap_or_default().total_attempts();
        Self {
            listener,
            pair,
            handler,
            failure_handler: LoggingFailureHandler,
            max_attempts,
            receive_timeout: settings.receive_timeout(),
            concurrency: settings.concurrency,
            _payload: PhantomData,
        }
    }
}

impl<T, L, H, F> Consumer<T, L, H, F>
where
    T: Payload,
    L: Listener,
    H: MessageHandler<T>,
    F: FailureHandler,
{
    pub fn with_failure_handler<G: FailureHandler>(self, failure_handler: G) -> Consumer<T, L, H, G> {
        Consumer {
            listener: self.listener,
            pair: self.pair,
            handler: self.handler,
            failure_handler,
            max_attempts: self.max_attempts,
            receive_timeout: self.receive_timeout,
            concurrency: self.concurrency,
            _payload: PhantomData,
        }
    }

    /// Attempt budget reported to handlers. Defaults to the broker's policy;
    /// the broker still decides when a message is dead-lettered.
    pub fn with_policy(mut self, policy: &RedeliveryPolicy) -> Self {
        self.max_attempts = policy.total_attempts();
        self
    }

    pub fn with_settings(mut self, settings: &ListenerSettings) -> Self {
        self.receive_timeout = settings.receive_timeout();
        self.concurrency = settings.concurrency.max(1);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn destination(&self) -> &str {
        self.pair.queue()
    }

    pub fn dead_letter_queue(&self) -> &str {
        self.pair.dlq()
    }

    /// Wait up to the receive timeout for one delivery and settle it.
    ///
    /// Returns `Ok(None)` when nothing arrived.
    pub fn poll_once(&self) -> Result<Option<DeliveryOutcome>, QueueError> {
        let destination = self.pair.queue();
        let timeout_ms = self.receive_timeout.as_millis().min(u64::MAX as u128) as u64;

        let delivery = self
            .listener
            .listen(destination, timeout_ms)
            .map_err(|source| QueueError::Receive {
                destination: destination.to_string(),
                source,
            })?;
        let Some(delivery) = delivery else {
            return Ok(None);
        };

        let ctx = DeliveryContext::new(&delivery, self.max_attempts);
        tracing::debug!(
            destination,
            message_id = %ctx.message_id,
            attempt = ctx.attempt,
            "message received"
        );

        match self.process(&delivery, &ctx) {
            Ok(Ack) => self.acknowledge(&delivery, &ctx),
            Err(failure) => self.reject(&delivery, &ctx, failure),
        }
    }

    fn process(&self, delivery: &Delivery, ctx: &DeliveryContext) -> Result<Ack, ProcessingFailure> {
        let payload = delivery.message.decode::<T>()?;
        match panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(payload, ctx))) {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(retry)) => Err(ProcessingFailure::Handler(retry.into_reason())),
            Err(panic) => Err(ProcessingFailure::Panicked(panic_message(panic.as_ref()))),
        }
    }

    fn acknowledge(
        &self,
        delivery: &Delivery,
        ctx: &DeliveryContext,
    ) -> Result<Option<DeliveryOutcome>, QueueError> {
        if let Err(source) = self.listener.ack(delivery) {
            tracing::warn!(
                destination = %ctx.destination,
                message_id = %ctx.message_id,
                error = %source,
                "acknowledgment failed, broker will redeliver"
            );
            return Err(QueueError::Acknowledge {
                destination: ctx.destination.clone(),
                message_id: ctx.message_id.clone(),
                source,
            });
        }

        tracing::debug!(
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            attempt = ctx.attempt,
            "message acknowledged"
        );
        Ok(Some(DeliveryOutcome::Acknowledged))
    }

    fn reject(
        &self,
        delivery: &Delivery,
        ctx: &DeliveryContext,
        failure: ProcessingFailure,
    ) -> Result<Option<DeliveryOutcome>, QueueError> {
        if panic::catch_unwind(AssertUnwindSafe(|| self.failure_handler.on_error(ctx, &failure)))
            .is_err()
        {
            tracing::error!(
                destination = %ctx.destination,
                message_id = %ctx.message_id,
                "failure handler panicked"
            );
        }

        let outcome = self
            .listener
            .nack(delivery, &failure.to_string())
            .map_err(|source| QueueError::Reject {
                destination: ctx.destination.clone(),
                message_id: ctx.message_id.clone(),
                source,
            })?;

        match &outcome {
            DeliveryOutcome::Redeliver {
                next_attempt,
                delay,
            } => tracing::warn!(
                destination = %ctx.destination,
                message_id = %ctx.message_id,
                next_attempt,
                delay_ms = delay.as_millis() as u64,
                "redelivery scheduled"
            ),
            DeliveryOutcome::DeadLettered { dlq, attempts } => tracing::error!(
                destination = %ctx.destination,
                message_id = %ctx.message_id,
                dlq = %dlq,
                attempts,
                "redeliveries exhausted, message moved to dead-letter queue"
            ),
            DeliveryOutcome::Acknowledged => {}
        }

        Ok(Some(outcome))
    }
}

impl<T, L, H, F> Consumer<T, L, H, F>
where
    T: Payload + 'static,
    L: Listener + 'static,
    H: MessageHandler<T> + 'static,
    F: FailureHandler + 'static,
{
    /// Run the consumer on background threads, one per concurrency slot.
    ///
    /// Each slot holds at most one unacknowledged delivery at a time.
    pub fn spawn(self) -> ConsumerHandle {
        let slots = self.concurrency.max(1);
        let backoff = self.receive_timeout.max(Duration::from_millis(1));
        let consumer = Arc::new(self);

        tracing::info!(
            destination = consumer.destination(),
            slots,
            "consumer started"
        );

        spawn_slots(slots, move |stats: &mut ConsumerStats| {
            stats.polls += 1;
            let result = consumer.poll_once();
            stats.record(&result);
            if let Err(err) = result {
                tracing::warn!(error = %err, "consumer poll failed");
                if matches!(err, QueueError::Receive { .. }) {
                    thread::sleep(backoff);
                }
            }
        })
    }
}
