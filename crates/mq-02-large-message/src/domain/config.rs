//! Large-message configuration and validation

use serde::{Deserialize, Serialize};

use super::errors::{LargeMessageError, LargeMessageResult};

/// Bodies at or above this size are sent in chunks.
pub const DEFAULT_MIN_LARGE_MESSAGE_SIZE: usize = 100 * 1024;

/// Unconfirmed chunk bytes a producer may have in flight.
pub const DEFAULT_CONFIRMATION_WINDOW_SIZE: usize = 1024 * 1024;

/// Largest body a consumer reassembles in memory.
pub const DEFAULT_CONSUMER_BUFFER_LIMIT: usize = 10 * 1024 * 1024;

/// Large-message configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeMessageConfig {
    /// Threshold between inline and chunked transfer
    pub min_large_message_size: usize,
    /// Upper bound on a chunk's payload
    pub chunk_size: usize,
    /// Producer credit window in bytes; must hold at least one chunk
    pub confirmation_window_size: usize,
    /// In-memory reassembly limit on the consumer side
    pub consumer_buffer_limit: usize,
}

impl Default for LargeMessageConfig {
    fn default() -> Self {
        Self {
            min_large_message_size: DEFAULT_MIN_LARGE_MESSAGE_SIZE,
            chunk_size: DEFAULT_MIN_LARGE_MESSAGE_SIZE,
            confirmation_window_size: DEFAULT_CONFIRMATION_WINDOW_SIZE,
            consumer_buffer_limit: DEFAULT_CONSUMER_BUFFER_LIMIT,
        }
    }
}

impl LargeMessageConfig {
    /// Builder-style method to set the chunking threshold
    pub fn with_min_large_message_size(mut self, bytes: usize) -> Self {
        self.min_large_message_size = bytes;
        self
    }

    /// Builder-style method to set the chunk size
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Builder-style method to set the confirmation window
    pub fn with_confirmation_window_size(mut self, bytes: usize) -> Self {
        self.confirmation_window_size = bytes;
        self
    }

    /// Builder-style method to set the consumer buffer limit
    pub fn with_consumer_buffer_limit(mut self, bytes: usize) -> Self {
        self.consumer_buffer_limit = bytes;
        self
    }

    pub fn validate(&self) -> LargeMessageResult<()> {
        if self.min_large_message_size == 0 {
            return Err(invalid("min_large_message_size cannot be 0"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size cannot be 0"));
        }
        // A window smaller than one chunk could never admit that chunk.
        if self.confirmation_window_size < self.chunk_size {
            return Err(invalid(format!(
                "confirmation_window_size {} is smaller than chunk_size {}",
                self.confirmation_window_size, self.chunk_size
            )));
        }
        if self.consumer_buffer_limit == 0 {
            return Err(invalid("consumer_buffer_limit cannot be 0"));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

fn invalid(reason: impl Into<String>) -> LargeMessageError {
    LargeMessageError::InvalidConfig {
        reason: reason.into(),
    }
}
