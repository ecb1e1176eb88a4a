//! # Error Types
//!
//! Validation errors for identifiers shared across crates.

use thiserror::Error;

/// Rejected address or queue name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("{kind} name must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} name is {len} bytes, limit is {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
}
