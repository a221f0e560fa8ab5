//! Redelivery bookkeeping.
//!
//! A [`RedeliveryPolicy`] is read-only configuration handed to the broker
//! client at startup. The broker consults it whenever a delivery is rejected
//! and reports the decision back as a [`DeliveryOutcome`]:
//!
//! ```text
//! attempt 1 ──fail──▶ Redeliver (initial_delay)
//! attempt 2 ──fail──▶ Redeliver (redelivery_delay)
//!    ...
//! attempt N+1 ─fail─▶ DeadLettered → <destination>.DLQ
//! ```

mod outcome;
mod policy;

pub use outcome::DeliveryOutcome;
pub use policy::{RedeliveryPolicy, DEFAULT_DLQ_SUFFIX};
