//! # Memory Accounting
//!
//! Broker-wide byte counters. Resident bytes are reserved atomically when a
//! store keeps a message in memory and released when the message goes; they
//! drive admission. Paged bytes follow page appends and deletions. Both
//! together are compared with the limit by [`GlobalSizeTracker::is_full`].

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub struct GlobalSizeTracker {
    used: AtomicU64,
    paged: AtomicU64,
    max: Option<u64>,
    freed: Notify,
}

impl GlobalSizeTracker {
    pub fn new(max: Option<u64>) -> Self {
        Self {
            used: AtomicU64::new(0),
            paged: AtomicU64::new(0),
            max,
            freed: Notify::new(),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn max(&self) -> Option<u64> {
        self.max
    }

    /// Add `bytes` unless that would cross the limit, in one atomic step.
    ///
    /// Returns false and leaves the counter untouched when it would.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        let Some(max) = self.max else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
            return true;
        };
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let total = used.checked_add(bytes)?;
                (total <= max).then_some(total)
            })
            .is_ok()
    }

    /// Give back a reservation that was not used. Does not wake blocked
    /// senders.
    pub fn cancel_reservation(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Subtract `bytes`, never going below zero, and wake blocked senders.
    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
        self.freed.notify_waiters();
    }

    /// Whether adding `incoming` resident bytes would cross the global limit.
    pub fn would_exceed(&self, incoming: u64) -> bool {
        match self.max {
            Some(max) => self.used().saturating_add(incoming) > max,
            None => false,
        }
    }

    pub fn paged(&self) -> u64 {
        self.paged.load(Ordering::Acquire)
    }

    pub fn add_paged(&self, bytes: u64) {
        self.paged.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn release_paged(&self, bytes: u64) {
        let _ = self
            .paged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |paged| {
                Some(paged.saturating_sub(bytes))
            });
    }

    /// True when paged plus resident bytes exceed the global limit.
    pub fn is_full(&self) -> bool {
        match self.max {
            Some(max) => self.used().saturating_add(self.paged()) > max,
            None => false,
        }
    }

    /// Signalled whenever bytes are released anywhere in the broker.
    pub fn freed(&self) -> &Notify {
        &self.freed
    }
}
