//! Background listener threads.
//!
//! Every slot is a thread with its own stop channel. Stopping a handle
//! signals all slots, joins them and sums their statistics.

use std::any::Any;
use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::QueueError;
use crate::redelivery::DeliveryOutcome;

/// Per-slot counters that can be summed across slots.
pub trait SlotStats: Default + Send + 'static {
    fn merge(&mut self, other: Self);
}

/// Statistics from a running consumer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acknowledged: usize,
    pub redelivered: usize,
    pub dead_lettered: usize,
    pub errors: usize,
    pub polls: usize,
}

impl ConsumerStats {
    pub(crate) fn record(&mut self, result: &Result<Option<DeliveryOutcome>, QueueError>) {
        match result {
            Ok(Some(DeliveryOutcome::Acknowledged)) => self.acknowledged += 1,
            Ok(Some(DeliveryOutcome::Redeliver { .. })) => self.redelivered += 1,
            Ok(Some(DeliveryOutcome::DeadLettered { .. })) => self.dead_lettered += 1,
            Ok(None) => {}
            Err(_) => self.errors += 1,
        }
    }
}

impl SlotStats for ConsumerStats {
    fn merge(&mut self, other: Self) {
        self.acknowledged += other.acknowledged;
        self.redelivered += other.redelivered;
        self.dead_lettered += other.dead_lettered;
        self.errors += other.errors;
        self.polls += other.polls;
    }
}

struct Slot<S> {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<S>>,
}

/// Handle to a set of listener threads.
///
/// Dropping the handle signals the threads to stop without waiting.
pub struct ListenerHandle<S: SlotStats> {
    slots: Vec<Slot<S>>,
}

pub type ConsumerHandle = ListenerHandle<ConsumerStats>;

impl<S: SlotStats> ListenerHandle<S> {
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Signal every slot to stop (non-blocking).
    pub fn signal_stop(&self) {
        for slot in &self.slots {
            let _ = slot.stop_tx.send(());
        }
    }

    /// Stop every slot, wait for them and return the combined statistics.
    ///
    /// A slot that is mid-delivery finishes settling it first.
    pub fn stop(mut self) -> S {
        self.signal_stop();
        let mut total = S::default();
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                total.merge(handle.join().unwrap_or_default());
            }
        }
        total
    }

    pub fn is_running(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }
}

impl<S: SlotStats> Drop for ListenerHandle<S> {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Run `work` in a loop on `slots` threads until the handle stops them.
pub(crate) fn spawn_slots<S, W>(slots: usize, work: W) -> ListenerHandle<S>
where
    S: SlotStats,
    W: Fn(&mut S) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let slots = (0..slots.max(1))
        .map(|_| {
            let (stop_tx, stop_rx) = channel();
            let work = Arc::clone(&work);
            let handle = thread::spawn(move || {
                let mut stats = S::default();
                loop {
                    match stop_rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                    }
                    work(&mut stats);
                }
                stats
            });
            Slot {
                stop_tx,
                handle: Some(handle),
            }
        })
        .collect();

    ListenerHandle { slots }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
