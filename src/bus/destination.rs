//! Mapping of logical destination names to queue / dead-letter-queue pairs.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::QueueError;
use crate::redelivery::{RedeliveryPolicy, DEFAULT_DLQ_SUFFIX};

/// A regular queue and the dead-letter queue paired with it.
///
/// The two are distinct destinations related only by naming convention
/// (`<name>` ↔ `<name><suffix>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueuePair {
    queue: String,
    dlq: String,
}

impl QueuePair {
    /// Pair `queue` with its dead-letter queue under `dlq_suffix`.
    pub fn new(queue: impl Into<String>, dlq_suffix: &str) -> Self {
        let queue = queue.into();
        let dlq = format!("{}{}", queue, dlq_suffix);
        Self { queue, dlq }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn dlq(&self) -> &str {
        &self.dlq
    }
}

impl fmt::Display for QueuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.queue, self.dlq)
    }
}

/// Resolves destination names against a fixed set of known queues.
///
/// ## Example
///
/// ```
/// use msgrelay::bus::DestinationResolver;
///
/// let resolver = DestinationResolver::default().register("orders");
///
/// let pair = resolver.resolve("orders").unwrap();
/// assert_eq!(pair.dlq(), "orders.DLQ");
/// assert!(resolver.resolve("invoices").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct DestinationResolver {
    known: BTreeSet<String>,
    dlq_suffix: String,
}

impl Default for DestinationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_SUFFIX)
    }
}

impl DestinationResolver {
    pub fn new(dlq_suffix: impl Into<String>) -> Self {
        Self {
            known: BTreeSet::new(),
            dlq_suffix: dlq_suffix.into(),
        }
    }

    /// Use the dead-letter naming convention of `policy`.
    pub fn for_policy(policy: &RedeliveryPolicy) -> Self {
        Self::new(policy.dlq_suffix())
    }

    /// Register a regular destination. Its DLQ becomes resolvable too.
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.known.insert(name.into());
        self
    }

    /// Resolve a regular destination to its queue pair.
    pub fn resolve(&self, name: &str) -> Result<QueuePair, QueueError> {
        if name.is_empty() || !self.known.contains(name) {
            return Err(QueueError::QueueNotFound(name.to_string()));
        }
        Ok(QueuePair::new(name, &self.dlq_suffix))
    }

    /// `true` if `name` is a registered queue or the DLQ of one.
    pub fn contains(&self, name: &str) -> bool {
        self.known.contains(name) || self.origin_of(name).is_some()
    }

    /// The regular destination a dead-letter queue belongs to.
    pub fn origin_of(&self, dlq: &str) -> Option<&str> {
        let origin = dlq.strip_suffix(self.dlq_suffix.as_str())?;
        self.known.get(origin).map(String::as_str)
    }

    /// All registered pairs, in name order.
    pub fn pairs(&self) -> impl Iterator<Item = QueuePair> + '_ {
        self.known
            .iter()
            .map(|name| QueuePair::new(name.as_str(), &self.dlq_suffix))
    }
}
