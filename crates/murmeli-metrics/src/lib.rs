//! Delivery statistics for a Murmeli node.
//!
//! [`Counter`] is a relaxed atomic counter; [`DeliveryMetrics`] groups the
//! counters the outbox engine bumps and [`DeliverySnapshot`] is the plain,
//! serializable view of them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counter. Relaxed ordering: values are statistics only.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Live counters owned by the delivery engine.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Flush passes that ran to completion.
    pub flushes: Counter,
    /// Flushes skipped because another one held the outbox lock.
    pub flushes_skipped: Counter,
    /// Frames handed to the transport for their final recipient.
    pub direct_sends: Counter,
    /// Signed parcels handed to a relay contact.
    pub relay_sends: Counter,
    /// Transport failures (retryable).
    pub failures: Counter,
    /// Rows dropped as ignored, invalid or exhausted.
    pub dropped: Counter,
    /// Inbound relay parcels fanned out to our own contacts.
    pub relayed_for_others: Counter,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            flushes: self.flushes.get(),
            flushes_skipped: self.flushes_skipped.get(),
            direct_sends: self.direct_sends.get(),
            relay_sends: self.relay_sends.get(),
            failures: self.failures.get(),
            dropped: self.dropped.get(),
            relayed_for_others: self.relayed_for_others.get(),
        }
    }
}

/// Serializable view of [`DeliveryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySnapshot {
    pub flushes: u64,
    pub flushes_skipped: u64,
    pub direct_sends: u64,
    pub relay_sends: u64,
    pub failures: u64,
    pub dropped: u64,
    pub relayed_for_others: u64,
}

impl fmt::Display for DeliverySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flushes={} skipped={} direct={} relayed={} failed={} dropped={} forwarded={}",
            self.flushes,
            self.flushes_skipped,
            self.direct_sends,
            self.relay_sends,
            self.failures,
            self.dropped,
            self.relayed_for_others
        )
    }
}
