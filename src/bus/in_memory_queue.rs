//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe broker double that implements both
//! [`Sender`] and [`Listener`] and behaves like a real queue broker where it
//! matters to delivery semantics:
//! - competing consumers: each message is handed to exactly one listener
//! - explicit acknowledgment: delivered messages stay in flight until acked
//! - redelivery per [`RedeliveryPolicy`], then dead-lettering to `<queue>.DLQ`
//! - persistent messages survive [`InMemoryBroker::restart`]
//! - fault injection for unreachable, stalled, or lossy brokers

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::headers::{DELIVERY_ATTEMPTS, FAILURE_REASON, ORIGINAL_DESTINATION};
use super::{BrokerClient, Clock, Delivery, Listener, Message, Sender, SystemClock};
use crate::config::{BrokerSettings, MessagingConfig};
use crate::error::TransportError;
use crate::redelivery::{DeliveryOutcome, RedeliveryPolicy};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgment and delivery records kept by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// A delivery as observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub message_id: String,
    pub destination: String,
    pub attempt: u32,
    /// Broker clock time since the broker started
    pub at: Duration,
}

/// In-memory broker for testing and single-process scenarios.
///
/// Cloning yields another handle to the same broker.
///
/// ## Example
///
/// ```
/// use msgrelay::bus::{InMemoryBroker, Listener, Message, Sender};
/// use msgrelay::redelivery::RedeliveryPolicy;
///
/// let broker = InMemoryBroker::new(RedeliveryPolicy::default()).with_queue("orders");
///
/// broker.send("orders", Message::raw(r#"{"id":"123"}"#)).unwrap();
///
/// let delivery = broker.listen("orders", 100).unwrap().unwrap();
/// assert_eq!(delivery.attempt, 1);
/// broker.ack(&delivery).unwrap();
/// assert_eq!(broker.depth("orders"), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Shared>,
}

struct Shared {
    state: Mutex<BrokerState>,
    policy: RedeliveryPolicy,
    clock: Arc<dyn Clock>,
    started: Instant,
}

struct BrokerState {
    queues: BTreeMap<String, QueueState>,
    next_tag: u64,
    acked: VecDeque<String>,
    deliveries: VecDeque<DeliveryRecord>,
    history_limit: usize,
    operation_timeout: Duration,
    offline: bool,
    stalled: bool,
    lost_acks: usize,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    scheduled: Vec<Scheduled>,
    in_flight: HashMap<u64, Stored>,
}

#[derive(Clone)]
struct Stored {
    message: Message,
    /// Attempt number of the next (or current) delivery
    attempt: u32,
}

struct Scheduled {
    /// `None` when the delay overflows the clock: never due.
    due: Option<Instant>,
    stored: Stored,
}

#[derive(Serialize, Deserialize)]
struct JournalEntry {
    queue: String,
    attempt: u32,
    message: Message,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        if self.scheduled.is_empty() {
            return;
        }
        self.scheduled.sort_by_key(|s| (s.due.is_none(), s.due));
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|s| matches!(s.due, Some(at) if at <= now));
        self.scheduled = waiting;
        self.ready.extend(due.into_iter().map(|s| s.stored));
    }

    fn waiting(&self) -> usize {
        self.ready.len() + self.scheduled.len()
    }
}

impl InMemoryBroker {
    /// Create a broker that applies `policy` to rejected deliveries.
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }

    /// Create a broker that schedules redeliveries against `clock`.
    pub fn with_clock(policy: RedeliveryPolicy, clock: impl Clock + 'static) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let started = clock.now();
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    queues: BTreeMap::new(),
                    next_tag: 1,
                    acked: VecDeque::new(),
                    deliveries: VecDeque::new(),
                    history_limit: DEFAULT_HISTORY_LIMIT,
                    operation_timeout: DEFAULT_OPERATION_TIMEOUT,
                    offline: false,
                    stalled: false,
                    lost_acks: 0,
                }),
                policy,
                clock,
                started,
            }),
        }
    }

    /// Create a broker with the policy and bounded wait described by `config`.
    pub fn from_config(config: &MessagingConfig) -> Self {
        let broker = Self::new(config.redelivery_policy());
        broker.set_operation_timeout(config.broker.operation_timeout());
        broker
    }

    /// Rebuild a broker from a journal written by [`journal`](Self::journal).
    pub fn from_journal(
        policy: RedeliveryPolicy,
        clock: impl Clock + 'static,
        journal: &str,
    ) -> Result<Self, serde_json::Error> {
        let broker = Self::with_clock(policy, clock);
        broker.load_journal(journal)?;
        Ok(broker)
    }

    /// Declare a queue and its dead-letter queue.
    pub fn declare(&self, queue: &str) {
        let dlq = self.inner.policy.dlq_for(queue);
        let mut state = self.lock();
        state.queues.entry(queue.to_string()).or_default();
        state.queues.entry(dlq).or_default();
    }

    pub fn with_queue(self, queue: &str) -> Self {
        self.declare(queue);
        self
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.inner.policy
    }

    /// Declared queue names, dead-letter queues included.
    pub fn queues(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    /// Messages waiting on `queue` (ready or scheduled for redelivery).
    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, QueueState::waiting)
    }

    /// Messages delivered from `queue` and not yet settled.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.in_flight.len())
    }

    /// Snapshot of the messages waiting on `queue`, in delivery order.
    pub fn messages(&self, queue: &str) -> Vec<Message> {
        let state = self.lock();
        let Some(q) = state.queues.get(queue) else {
            return Vec::new();
        };
        q.ready
            .iter()
            .chain(q.scheduled.iter().map(|s| &s.stored))
            .map(|s| s.message.clone())
            .collect()
    }

    /// Ids of acknowledged messages, in acknowledgment order.
    ///
    /// Only the most recent [`set_history_limit`](Self::set_history_limit)
    /// entries are kept.
    pub fn acknowledged(&self) -> Vec<String> {
        self.lock().acked.iter().cloned().collect()
    }

    /// Deliveries handed out, oldest first, bounded like
    /// [`acknowledged`](Self::acknowledged).
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.lock().deliveries.iter().cloned().collect()
    }

    /// Deliveries of one message, in order.
    pub fn deliveries_of(&self, message_id: &str) -> Vec<DeliveryRecord> {
        self.lock()
            .deliveries
            .iter()
            .filter(|d| d.message_id == message_id)
            .cloned()
            .collect()
    }

    /// Bounded wait applied while the broker is stalled.
    pub fn set_operation_timeout(&self, timeout: Duration) {
        self.lock().operation_timeout = timeout;
    }

    /// Keep at most `limit` acknowledgment and delivery records each,
    /// dropping the oldest first. `0` disables recording.
    pub fn set_history_limit(&self, limit: usize) {
        let mut state = self.lock();
        state.history_limit = limit;
        truncate_front(&mut state.acked, limit);
        truncate_front(&mut state.deliveries, limit);
    }

    /// Make every operation fail as if the broker were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make every operation hang for the operation timeout, then time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Lose the next `count` acknowledgments in transit.
    ///
    /// The broker never sees them, so the messages are treated as
    /// unacknowledged and go through the redelivery policy.
    pub fn lose_next_acks(&self, count: usize) {
        self.lock().lost_acks = count;
    }

    /// Serialize every persistent message the broker holds.
    ///
    /// In-flight messages are journaled as redeliveries: their attempt
    /// counter is already advanced.
    pub fn journal(&self) -> Result<String, serde_json::Error> {
        let state = self.lock();
        let mut entries = Vec::new();

        for (name, q) in &state.queues {
            let mut in_flight: Vec<_> = q.in_flight.iter().collect();
            in_flight.sort_by_key(|(tag, _)| **tag);

            let redelivered = in_flight.into_iter().map(|(_, s)| Stored {
                message: s.message.clone(),
                attempt: s.attempt + 1,
            });
            let mut scheduled: Vec<_> = q.scheduled.iter().collect();
            scheduled.sort_by_key(|s| (s.due.is_none(), s.due));
            let waiting = scheduled
                .into_iter()
                .map(|s| s.stored.clone())
                .chain(q.ready.iter().cloned());

            entries.extend(
                redelivered
                    .chain(waiting)
                    .filter(|s| s.message.persistent)
                    .map(|s| JournalEntry {
                        queue: name.clone(),
                        attempt: s.attempt,
                        message: s.message,
                    }),
            );
        }

        serde_json::to_string(&entries)
    }

    /// Simulate a broker crash and restart.
    ///
    /// Non-persistent messages are lost. Persistent messages that were in
    /// flight come back as redeliveries; outstanding delivery tags are void.
    pub fn restart(&self) -> Result<(), serde_json::Error> {
        let journal = self.journal()?;
        {
            let mut state = self.lock();
            for q in state.queues.values_mut() {
                *q = QueueState::default();
            }
        }
        self.load_journal(&journal)?;
        tracing::info!("in-memory broker restarted from journal");
        Ok(())
    }

    fn load_journal(&self, journal: &str) -> Result<(), serde_json::Error> {
        let entries: Vec<JournalEntry> = serde_json::from_str(journal)?;
        let mut state = self.lock();
        for entry in entries {
            state
                .queues
                .entry(entry.queue)
                .or_default()
                .ready
                .push_back(Stored {
                    message: entry.message,
                    attempt: entry.attempt,
                });
        }
        Ok(())
    }

    /// Clear all messages and bookkeeping (useful for test cleanup).
    pub fn clear(&self) {
        let mut state = self.lock();
        for q in state.queues.values_mut() {
            *q = QueueState::default();
        }
        state.acked.clear();
        state.deliveries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the state, failing the way an unhealthy broker would.
    fn gate(&self) -> Result<MutexGuard<'_, BrokerState>, TransportError> {
        let state = self.lock();
        if state.offline {
            return Err(TransportError::ConnectionFailed(
                "broker unreachable".to_string(),
            ));
        }
        if state.stalled {
            let timeout = state.operation_timeout;
            drop(state);
            thread::sleep(timeout);
            return Err(TransportError::Timeout(timeout));
        }
        Ok(state)
    }

    /// A settlement that never reached the broker leaves the delivery
    /// unacknowledged, so the redelivery policy applies to it.
    fn abandon(&self, delivery: &Delivery, reason: &str) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let stored = state
            .queues
            .get_mut(&delivery.destination)
            .and_then(|q| q.in_flight.remove(&delivery.tag));
        if let Some(stored) = stored {
            self.settle_failure(state, &delivery.destination, stored, reason);
        }
    }

    /// Apply the redelivery policy to a delivery that was not acknowledged.
    fn settle_failure(
        &self,
        state: &mut BrokerState,
        destination: &str,
        stored: Stored,
        reason: &str,
    ) -> DeliveryOutcome {
        let policy = &self.inner.policy;
        let outcome = if policy.is_dlq(destination) {
            let next_attempt = stored.attempt + 1;
            DeliveryOutcome::Redeliver {
                next_attempt,
                delay: policy.delay_before(next_attempt).unwrap_or_default(),
            }
        } else {
            policy.after_failure(destination, stored.attempt)
        };

        match &outcome {
            DeliveryOutcome::Redeliver {
                next_attempt,
                delay,
            } => {
                let due = self.inner.clock.now().checked_add(*delay);
                state
                    .queues
                    .entry(destination.to_string())
                    .or_default()
                    .scheduled
                    .push(Scheduled {
                        due,
                        stored: Stored {
                            message: stored.message,
                            attempt: *next_attempt,
                        },
                    });
            }
            DeliveryOutcome::DeadLettered { dlq, attempts } => {
                let mut message = stored.message;
                message.set_header(ORIGINAL_DESTINATION, destination);
                message.set_header(FAILURE_REASON, reason);
                message.set_header(DELIVERY_ATTEMPTS, attempts.to_string());
                state
                    .queues
                    .entry(dlq.clone())
                    .or_default()
                    .ready
                    .push_back(Stored {
                        message,
                        attempt: 1,
                    });
            }
            DeliveryOutcome::Acknowledged => {}
        }

        outcome
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    truncate_front(log, limit - 1);
    log.push_back(item);
}

fn truncate_front<T>(log: &mut VecDeque<T>, limit: usize) {
    while log.len() > limit {
        log.pop_front();
    }
}

impl BrokerClient for InMemoryBroker {
    fn apply_settings(&self, settings: &BrokerSettings) {
        self.set_operation_timeout(settings.operation_timeout());
    }
}

impl Sender for InMemoryBroker {
    fn send(&self, queue: &str, message: Message) -> Result<(), TransportError> {
        let mut state = self.gate()?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        q.ready.push_back(Stored {
            message,
            attempt: 1,
        });
        Ok(())
    }
}

impl Listener for InMemoryBroker {
    fn redelivery_policy(&self) -> Option<RedeliveryPolicy> {
        Some(self.inner.policy.clone())
    }

    fn listen(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            {
                let mut guard = self.gate()?;
                let state = &mut *guard;
                let now = self.inner.clock.now();
                let q = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
                q.promote_due(now);

                if let Some(stored) = q.ready.pop_front() {
                    let tag = state.next_tag;
                    state.next_tag += 1;

                    let delivery = Delivery {
                        tag,
                        destination: queue.to_string(),
                        attempt: stored.attempt,
                        message: stored.message.clone(),
                    };
                    q.in_flight.insert(tag, stored);
                    let limit = state.history_limit;
                    push_bounded(
                        &mut state.deliveries,
                        DeliveryRecord {
                            message_id: delivery.message.id.clone(),
                            destination: delivery.destination.clone(),
                            attempt: delivery.attempt,
                            at: now.saturating_duration_since(self.inner.started),
                        },
                        limit,
                    );
                    return Ok(Some(delivery));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut guard = self.gate().inspect_err(|_| {
            self.abandon(delivery, "acknowledgment not delivered");
        })?;
        let state = &mut *guard;
        let stored = state
            .queues
            .get_mut(&delivery.destination)
            .ok_or_else(|| TransportError::UnknownQueue(delivery.destination.clone()))?
            .in_flight
            .remove(&delivery.tag)
            .ok_or(TransportError::UnknownDelivery(delivery.tag))?;

        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            self.settle_failure(state, &delivery.destination, stored, "acknowledgment lost");
            return Err(TransportError::ConnectionFailed(
                "acknowledgment lost in transit".to_string(),
            ));
        }

        let limit = state.history_limit;
        push_bounded(&mut state.acked, stored.message.id, limit);
        Ok(())
    }

    fn nack(&self, delivery: &Delivery, reason: &str) -> Result<DeliveryOutcome, TransportError> {
        let mut guard = self.gate().inspect_err(|_| {
            self.abandon(delivery, reason);
        })?;
        let state = &mut *guard;
        let stored = state
            .queues
            .get_mut(&delivery.destination)
            .ok_or_else(|| TransportError::UnknownQueue(delivery.destination.clone()))?
            .in_flight
            .remove(&delivery.tag)
            .ok_or(TransportError::UnknownDelivery(delivery.tag))?;

        Ok(self.settle_failure(state, &delivery.destination, stored, reason))
    }
}
