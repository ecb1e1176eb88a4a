//! # Admission Control
//!
//! Pure decision logic for an incoming message. The store feeds in its
//! current state and whether the message would cross a limit; the decision
//! tells it what to do. No I/O happens here.

use super::settings::AddressFullPolicy;

/// Memory state of a single address store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingState {
    /// Messages are held in memory and delivered straight to queues.
    NotPaging,
    /// New messages are appended to page files.
    Paging,
}

impl std::fmt::Display for PagingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PagingState::NotPaging => f.write_str("NOT_PAGING"),
            PagingState::Paging => f.write_str("PAGING"),
        }
    }
}

/// Outcome of evaluating a send against the address limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Keep in memory and route to queues now.
    Accept,
    /// Append to the active page file.
    Page,
    /// Suspend the sender until space is freed.
    Block,
    /// Discard without error.
    Drop,
    /// Reject with `DestinationFull`.
    Reject,
}

/// Whether adding `incoming` bytes would push the address past its limit.
///
/// Crossing is strict: `resident + incoming == max` still fits.
pub fn exceeds_limit(resident: u64, incoming: u64, max: Option<u64>, global_full: bool) -> bool {
    if global_full {
        return true;
    }
    match max {
        Some(max) => resident.saturating_add(incoming) > max,
        None => false,
    }
}

/// Decide what to do with a message.
///
/// A store that is already paging keeps paging even when the message would
/// fit, so that nothing overtakes the messages already on disk.
pub fn decide(policy: AddressFullPolicy, state: PagingState, over_limit: bool) -> AdmissionDecision {
    match (policy, over_limit) {
        (AddressFullPolicy::Fail, true) => AdmissionDecision::Reject,
        (AddressFullPolicy::Fail, false) if state == PagingState::Paging => {
            AdmissionDecision::Reject
        }
        (AddressFullPolicy::Drop, true) => AdmissionDecision::Drop,
        (AddressFullPolicy::Block, true) => AdmissionDecision::Block,
        (AddressFullPolicy::Page, true) => AdmissionDecision::Page,
        (_, false) if state == PagingState::Paging => AdmissionDecision::Page,
        (_, false) => AdmissionDecision::Accept,
    }
}
