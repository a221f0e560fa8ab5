//! Shared broker connection with an explicit open/close lifecycle.
//!
//! A process opens one [`Connection`] at startup and hands clones of it to
//! every producer and consumer. Closing it returns every delivery taken
//! through the connection and not yet settled to the broker, which applies
//! its redelivery policy to them. Every later operation fails with
//! [`TransportError::Closed`] instead of reaching the broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Delivery, Listener, Message, Sender};
use crate::config::BrokerSettings;
use crate::error::TransportError;
use crate::redelivery::{DeliveryOutcome, RedeliveryPolicy};

const CLOSED_REASON: &str = "connection closed";

/// Broker clients that take their settings from configuration.
pub trait BrokerClient: Send + Sync {
    fn apply_settings(&self, settings: &BrokerSettings);
}

impl<B: BrokerClient + ?Sized> BrokerClient for Arc<B> {
    fn apply_settings(&self, settings: &BrokerSettings) {
        (**self).apply_settings(settings)
    }
}

pub struct Connection<B> {
    inner: Arc<Inner<B>>,
}

struct Inner<B> {
    broker: B,
    url: String,
    open: AtomicBool,
    /// Deliveries taken through this connection and not yet settled, by tag
    outstanding: Mutex<HashMap<u64, Delivery>>,
}

impl<B> Clone for Connection<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BrokerClient> Connection<B> {
    /// Open a connection over `broker`, configured from `settings`.
    pub fn open(broker: B, settings: &BrokerSettings) -> Self {
        broker.apply_settings(settings);
        tracing::info!(
            url = %settings.url,
            username = %settings.username,
            operation_timeout_ms = settings.operation_timeout_ms,
            "broker connection opened"
        );
        Self {
            inner: Arc::new(Inner {
                broker,
                url: settings.url.clone(),
                open: AtomicBool::new(true),
                outstanding: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl<B> Connection<B> {
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The underlying broker client.
    pub fn broker(&self) -> &B {
        &self.inner.broker
    }

    /// Deliveries taken through this connection and not yet settled.
    pub fn outstanding(&self) -> usize {
        self.lock_outstanding().len()
    }

    fn live(&self) -> Result<&B, TransportError> {
        if self.is_open() {
            Ok(&self.inner.broker)
        } else {
            Err(TransportError::Closed)
        }
    }

    fn lock_outstanding(&self) -> MutexGuard<'_, HashMap<u64, Delivery>> {
        self.inner
            .outstanding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: Listener> Connection<B> {
    /// Close the connection for every clone. Idempotent.
    ///
    /// Unsettled deliveries go back to the broker as rejections.
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let abandoned: Vec<Delivery> = self.lock_outstanding().drain().map(|(_, d)| d).collect();
        for delivery in &abandoned {
            self.give_back(delivery);
        }

        tracing::info!(
            url = %self.inner.url,
            returned = abandoned.len(),
            "broker connection closed"
        );
    }

    fn give_back(&self, delivery: &Delivery) {
        if let Err(err) = self.inner.broker.nack(delivery, CLOSED_REASON) {
            tracing::warn!(
                destination = %delivery.destination,
                message_id = %delivery.message.id,
                error = %err,
                "could not return delivery to broker"
            );
        }
    }
}

impl<B: Sender> Sender for Connection<B> {
    fn send(&self, queue: &str, message: Message) -> Result<(), TransportError> {
        self.live()?.send(queue, message)
    }
}

impl<B: Listener> Listener for Connection<B> {
    fn listen(&self, queue: &str, timeout_ms: u64) -> Result<Option<Delivery>, TransportError> {
        let Some(delivery) = self.live()?.listen(queue, timeout_ms)? else {
            return Ok(None);
        };

        self.lock_outstanding().insert(delivery.tag, delivery.clone());
        if !self.is_open() {
            // Closed while waiting; if close() did not take it back, do it here
            if let Some(delivery) = self.lock_outstanding().remove(&delivery.tag) {
                self.give_back(&delivery);
            }
            return Err(TransportError::Closed);
        }
        Ok(Some(delivery))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let broker = self.live()?;
        self.lock_outstanding().remove(&delivery.tag);
        broker.ack(delivery)
    }

    fn nack(&self, delivery: &Delivery, reason: &str) -> Result<DeliveryOutcome, TransportError> {
        let broker = self.live()?;
        self.lock_outstanding().remove(&delivery.tag);
        broker.nack(delivery, reason)
    }

    fn redelivery_policy(&self) -> Option<RedeliveryPolicy> {
        self.inner.broker.redelivery_policy()
    }
}
