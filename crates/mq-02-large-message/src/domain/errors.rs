//! Error types for large-message transfer

use mq_01_paging::PagingError;
use std::io;
use thiserror::Error;

/// Large-message transfer errors
#[derive(Debug, Error)]
pub enum LargeMessageError {
    /// Out-of-order, unknown or malformed chunk. Fails only the transfer it
    /// belongs to.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// Admission or body storage failed in the paging layer
    #[error(transparent)]
    Paging(#[from] PagingError),

    /// Reading the producer's body or writing to a consumer sink failed
    #[error("I/O failure on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The transfer was cancelled before its end-of-body frame
    #[error("Transfer cancelled")]
    Cancelled,

    /// The credit window was closed while a send waited on it
    #[error("Confirmation window closed")]
    WindowClosed,

    /// The body was read before its end-of-body frame arrived
    #[error("Body not complete: {received} bytes received")]
    BodyNotComplete { received: u64 },

    /// An in-memory body outgrew the consumer buffer limit
    #[error("Body of {size} bytes exceeds the in-memory limit of {max} bytes")]
    BodyTooLarge { size: u64, max: u64 },

    /// Configuration rejected at load time
    #[error("Invalid large message configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl LargeMessageError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        LargeMessageError::ProtocolViolation {
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        LargeMessageError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for large-message operations
pub type LargeMessageResult<T> = Result<T, LargeMessageError>;
