//! Error types for the paging subsystem

use shared_types::{Address, PagePosition, TransactionId, Xid};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Paging subsystem errors
#[derive(Debug, Error)]
pub enum PagingError {
    /// FAIL policy rejected a send because the address is over its limit
    #[error("Address {address} is full: {used} of {max} bytes in use")]
    DestinationFull { address: Address, used: u64, max: u64 },

    /// A BLOCK-policy send waited longer than its configured timeout
    #[error("Timed out after {waited:?} waiting for space on {address}")]
    SendTimeout { address: Address, waited: Duration },

    /// The underlying file layer failed
    #[error("I/O failure on {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A record or checkpoint failed its integrity check
    #[error("Corrupt data in {file}: {reason}")]
    Corruption { file: String, reason: String },

    /// The store for this address hit an I/O failure earlier and is fenced off
    #[error("Paging store for {address} has failed and no longer accepts writes")]
    StoreFailed { address: Address },

    /// The sending session closed while the send was suspended
    #[error("Session closed while waiting for space on {address}")]
    Closed { address: Address },

    /// The manager or store has not been started, or has been stopped
    #[error("Paging is not running")]
    NotStarted,

    /// Cursor was asked to acknowledge a position that cannot exist
    #[error("Unknown position {position} for queue {queue}")]
    UnknownPosition { queue: String, position: PagePosition },

    /// A persisted transaction record could not be decoded
    #[error("Cannot recover transaction from {file}: {reason}")]
    TransactionRecovery { file: String, reason: String },

    /// XA operation referenced an xid the coordinator does not know
    #[error("Unknown transaction {xid}")]
    UnknownTransaction { xid: Xid },

    /// An xid was started twice
    #[error("Transaction {xid} already exists")]
    DuplicateTransaction { xid: Xid },

    /// Operation not valid in the transaction's current state
    #[error("Transaction {id} is {state}, cannot {operation}")]
    InvalidTransactionState {
        id: TransactionId,
        state: String,
        operation: &'static str,
    },

    /// Stores still had in-flight transactions when the stop grace period ran out
    #[error("Stop timed out after {grace:?}; still busy: {addresses:?}")]
    StopTimeout {
        grace: Duration,
        addresses: Vec<Address>,
    },

    /// Configuration rejected at load time
    #[error("Invalid paging configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl PagingError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PagingError::IoFailure {
            context: context.into(),
            source,
        }
    }

    pub fn corruption(file: impl Into<String>, reason: impl Into<String>) -> Self {
        PagingError::Corruption {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that leave the store unable to accept further writes.
    pub fn is_fatal_for_store(&self) -> bool {
        matches!(self, PagingError::IoFailure { .. })
    }
}

/// Result type for paging operations
pub type PagingResult<T> = Result<T, PagingError>;
