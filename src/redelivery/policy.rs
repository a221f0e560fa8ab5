use std::time::Duration;

use super::DeliveryOutcome;

pub const DEFAULT_DLQ_SUFFIX: &str = ".DLQ";

/// How many times, and how far apart, a rejected message is redelivered.
///
/// Immutable once built. The defaults give 3 total attempts (1 initial + 2
/// redeliveries), two seconds apart, then dead-letter to `<destination>.DLQ`.
///
/// ```
/// use std::time::Duration;
/// use msgrelay::redelivery::RedeliveryPolicy;
///
/// let policy = RedeliveryPolicy::default();
/// assert_eq!(policy.total_attempts(), 3);
/// assert_eq!(policy.delay_before(2), Some(Duration::from_millis(2000)));
/// assert_eq!(policy.dlq_for("orders"), "orders.DLQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    max_redeliveries: u32,
    initial_delay: Duration,
    redelivery_delay: Duration,
    use_exponential_backoff: bool,
    maximum_redelivery_delay: Option<Duration>,
    dlq_suffix: String,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: 2,
            initial_delay: Duration::from_millis(2000),
            redelivery_delay: Duration::from_millis(2000),
            use_exponential_backoff: false,
            maximum_redelivery_delay: None,
            dlq_suffix: DEFAULT_DLQ_SUFFIX.to_string(),
        }
    }
}

impl RedeliveryPolicy {
    /// Constant-delay policy with `delay` before every redelivery.
    pub fn new(max_redeliveries: u32, delay: Duration) -> Self {
        Self {
            max_redeliveries,
            initial_delay: delay,
            redelivery_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Cap applied to every computed delay.
    pub fn with_maximum_redelivery_delay(mut self, cap: Duration) -> Self {
        self.maximum_redelivery_delay = Some(cap);
        self
    }

    pub fn with_dlq_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.dlq_suffix = suffix.into();
        self
    }

    pub fn max_redeliveries(&self) -> u32 {
        self.max_redeliveries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn redelivery_delay(&self) -> Duration {
        self.redelivery_delay
    }

    pub fn use_exponential_backoff(&self) -> bool {
        self.use_exponential_backoff
    }

    pub fn maximum_redelivery_delay(&self) -> Option<Duration> {
        self.maximum_redelivery_delay
    }

    pub fn dlq_suffix(&self) -> &str {
        &self.dlq_suffix
    }

    /// Initial delivery plus every redelivery.
    pub fn total_attempts(&self) -> u32 {
        self.max_redeliveries.saturating_add(1)
    }

    /// Delay the broker waits before presenting `attempt` (1-based).
    ///
    /// `None` for the first attempt, which is delivered immediately.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        let delay = match attempt {
            0 | 1 => return None,
            2 => self.initial_delay,
            k if self.use_exponential_backoff => 2u32
                .checked_pow(k - 2)
                .and_then(|factor| self.redelivery_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX),
            _ => self.redelivery_delay,
        };

        Some(match self.maximum_redelivery_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        })
    }

    /// Decide what happens after `attempt` failed on `destination`.
    pub fn after_failure(&self, destination: &str, attempt: u32) -> DeliveryOutcome {
        if attempt <= self.max_redeliveries {
            let next_attempt = attempt + 1;
            DeliveryOutcome::Redeliver {
                next_attempt,
                delay: self.delay_before(next_attempt).unwrap_or_default(),
            }
        } else {
            DeliveryOutcome::DeadLettered {
                dlq: self.dlq_for(destination),
                attempts: attempt,
            }
        }
    }

    /// Dead-letter queue paired with `destination`.
    pub fn dlq_for(&self, destination: &str) -> String {
        format!("{}{}", destination, self.dlq_suffix)
    }

    /// `true` if `destination` is itself a dead-letter queue.
    pub fn is_dlq(&self, destination: &str) -> bool {
        destination.len() > self.dlq_suffix.len() && destination.ends_with(&self.dlq_suffix)
    }
}
