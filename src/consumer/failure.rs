use thiserror::Error;

use super::DeliveryContext;
use crate::bus::CodecError;

/// Why a delivery could not be processed.
#[derive(Debug, Error)]
pub enum ProcessingFailure {
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("could not decode payload: {0}")]
    Decode(#[from] CodecError),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Observes processing failures before the delivery is rejected.
///
/// The consumer rejects the delivery after `on_error` returns, whatever the
/// implementation does; a failure handler cannot turn a failure into an
/// acknowledgment. Attempt counting stays with the broker.
pub trait FailureHandler: Send + Sync {
    fn on_error(&self, ctx: &DeliveryContext, failure: &ProcessingFailure);
}

impl<F> FailureHandler for F
where
    F: Fn(&DeliveryContext, &ProcessingFailure) + Send + Sync,
{
    fn on_error(&self, ctx: &DeliveryContext, failure: &ProcessingFailure) {
        self(ctx, failure)
    }
}

/// Logs the destination, attempt and cause of every failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn on_error(&self, ctx: &DeliveryContext, failure: &ProcessingFailure) {
        tracing::error!(
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts,
            last_attempt = ctx.is_last_attempt(),
            cause = %failure,
            "error in listener, returning message to broker"
        );
    }
}
