//! # Paging Metrics
//!
//! Point-in-time snapshots. Counters live in the stores; these are copies.

use serde::Serialize;
use shared_types::Address;

use super::admission::PagingState;
use super::settings::AddressFullPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    pub address: Address,
    pub paging: bool,
    pub policy: AddressFullPolicy,
    pub resident_bytes: u64,
    pub max_size_bytes: i64,
    pub paged_bytes: u64,
    pub page_count: usize,
    pub messages_paged: u64,
    pub messages_dropped: u64,
    pub messages_rejected: u64,
    /// Senders currently suspended by the BLOCK policy.
    pub blocked_senders: u64,
    pub queues: usize,
    pub failed: bool,
}

impl StoreMetrics {
    pub fn state(&self) -> PagingState {
        if self.paging {
            PagingState::Paging
        } else {
            PagingState::NotPaging
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagingMetrics {
    pub global_resident_bytes: u64,
    pub global_paged_bytes: u64,
    pub global_max_size_bytes: i64,
    pub stores: Vec<StoreMetrics>,
}

impl PagingMetrics {
    pub fn paging_addresses(&self) -> usize {
        self.stores.iter().filter(|s| s.paging).count()
    }

    pub fn total_paged_bytes(&self) -> u64 {
        self.stores.iter().map(|s| s.paged_bytes).sum()
    }
}

/// Outcome of one reclamation pass over a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub deleted_pages: Vec<u64>,
    pub freed_bytes: u64,
    pub released_bodies: Vec<shared_types::MessageId>,
    pub left_paging: bool,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_pages.is_empty() && !self.left_paging
    }

    pub fn merge(&mut self, other: ReclaimReport) {
        self.deleted_pages.extend(other.deleted_pages);
        self.freed_bytes += other.freed_bytes;
        self.released_bodies.extend(other.released_bodies);
        self.left_paging |= other.left_paging;
    }
}
