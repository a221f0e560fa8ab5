use std::time::Duration;

/// What happened to a message after one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and acknowledged; removed from the queue.
    Acknowledged,
    /// Returned to the queue; `next_attempt` is delivered after `delay`.
    Redeliver { next_attempt: u32, delay: Duration },
    /// Attempts exhausted; moved to the dead-letter queue `dlq`.
    DeadLettered { dlq: String, attempts: u32 },
}

impl DeliveryOutcome {
    /// `true` once the message has left the regular queue for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryOutcome::Redeliver { .. })
    }
}
